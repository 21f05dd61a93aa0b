//! Lookup orchestrator
//!
//! Resolves `(map, key, time)` against an ordered list of pipeline
//! references: picks the effective stream of each reference at the lookup
//! time, makes sure it is loaded, and returns a lazy proxy on the first map
//! that holds it.

use crate::delegating_store::DelegatingRefDataStore;
use crate::effective_stream_cache::EffectiveStreamCache;
use crate::result::{ReferenceDataResult, Severity};
use dashmap::{DashMap, DashSet};
use refdata_core::{
    error::{RefDataError, Result},
    observe,
    traits::{RefDataStore, ReferenceDataLoader},
    types::{
        DocRef, EffectiveMeta, LookupIdentifier, MapDefinition, PipelineReference,
        ProcessingState, RefDataValue, RefStreamDefinition,
    },
};
use std::sync::Arc;

/// Lookup entry point for one processing run
///
/// Remembers which ref streams it has confirmed loaded, which maps exist
/// and each pipeline's version, so repeated lookups skip the store probes.
/// Create one per run; the memo never expires.
pub struct ReferenceData {
    store: Arc<DelegatingRefDataStore>,
    effective_stream_cache: Arc<EffectiveStreamCache>,
    loader: Arc<dyn ReferenceDataLoader>,
    available_streams: DashSet<RefStreamDefinition>,
    map_existence: DashMap<MapDefinition, bool>,
    pipeline_versions: DashMap<DocRef, String>,
}

impl ReferenceData {
    pub fn new(
        store: Arc<DelegatingRefDataStore>,
        effective_stream_cache: Arc<EffectiveStreamCache>,
        loader: Arc<dyn ReferenceDataLoader>,
    ) -> Self {
        Self {
            store,
            effective_stream_cache,
            loader,
            available_streams: DashSet::new(),
            map_existence: DashMap::new(),
            pipeline_versions: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<DelegatingRefDataStore> {
        &self.store
    }

    /// Find the value for `lookup`, loading reference streams on demand.
    ///
    /// References are tried in order and the first one whose effective
    /// stream holds the map wins. Not finding a value is not an error: the
    /// result has no proxy and its messages say why. Store, load and feed
    /// resolution failures are returned as errors.
    pub fn ensure_reference_data_availability(
        &self,
        pipeline_references: &[PipelineReference],
        lookup: &LookupIdentifier,
    ) -> Result<ReferenceDataResult> {
        let mut result = ReferenceDataResult::new(lookup.clone());
        self.resolve(pipeline_references, lookup, &mut result)?;
        observe::record_lookup(result.has_proxy());
        Ok(result)
    }

    /// Look up and resolve the value in one step
    pub fn get_value(
        &self,
        pipeline_references: &[PipelineReference],
        lookup: &LookupIdentifier,
    ) -> Result<Option<RefDataValue>> {
        self.ensure_reference_data_availability(pipeline_references, lookup)?
            .supply_value()
    }

    fn resolve(
        &self,
        pipeline_references: &[PipelineReference],
        lookup: &LookupIdentifier,
        result: &mut ReferenceDataResult,
    ) -> Result<()> {
        result.set_current_lookup_identifier(lookup.clone());
        if !lookup.is_map_nested() {
            return self.resolve_map(pipeline_references, lookup, result);
        }

        // Each intermediate value is resolved now, as it keys the next map
        let primary = LookupIdentifier::new(
            lookup.primary_map_name(),
            lookup.key(),
            lookup.event_time_ms(),
        );
        self.resolve_map(pipeline_references, &primary, result)?;
        let Some(proxy) = result.take_proxy() else {
            result.log(
                Severity::Info,
                format!(
                    "Nested lookup stopped: no value in map '{}' for key '{}'",
                    primary.map_name(),
                    primary.key()
                ),
            );
            return Ok(());
        };

        match proxy.supply_value()? {
            Some(RefDataValue::String(next_key)) => match lookup.next(next_key) {
                Some(next) => self.resolve(pipeline_references, &next, result),
                None => Ok(()),
            },
            Some(other) => {
                result.log(
                    Severity::Error,
                    format!(
                        "Value of key '{}' in map '{}' is {:?}, a string is needed to key map '{}'",
                        primary.key(),
                        primary.map_name(),
                        other.value_type(),
                        lookup.secondary_map_name().unwrap_or_default()
                    ),
                );
                Ok(())
            }
            None => {
                result.log(
                    Severity::Info,
                    format!(
                        "Nested lookup stopped: no value in map '{}' for key '{}'",
                        primary.map_name(),
                        primary.key()
                    ),
                );
                Ok(())
            }
        }
    }

    /// Single (non-nested) map lookup over every reference
    fn resolve_map(
        &self,
        pipeline_references: &[PipelineReference],
        lookup: &LookupIdentifier,
        result: &mut ReferenceDataResult,
    ) -> Result<()> {
        for reference in pipeline_references {
            if !reference.is_fully_formed() {
                result.log(
                    Severity::Warning,
                    format!("Ignoring incomplete pipeline reference {}", reference),
                );
                continue;
            }

            let Some(effective) = self
                .effective_stream_cache
                .effective_stream(reference, lookup.event_time_ms())?
            else {
                result.log(
                    Severity::Info,
                    format!(
                        "No effective stream for feed '{}' at {}",
                        reference.feed.name,
                        lookup.event_time_ms()
                    ),
                );
                continue;
            };
            result.add_effective_stream(reference.clone(), effective.clone());

            let def = RefStreamDefinition::new(
                reference.pipeline.uuid.as_str(),
                self.pipeline_version(&reference.pipeline)?,
                effective.id,
            );
            self.ensure_loaded(&def, &effective)?;

            let map_definition = MapDefinition::new(def, lookup.map_name());
            if self.map_exists(&map_definition)? {
                result.set_proxy(self.store.get_value_proxy(&map_definition, lookup.key())?);
                return Ok(());
            }
            result.log(
                Severity::Info,
                format!("Map '{}' not found in stream {}", lookup.map_name(), effective.id),
            );
        }

        result.log(
            Severity::Info,
            format!("No map '{}' found in any reference", lookup.map_name()),
        );
        Ok(())
    }

    fn pipeline_version(&self, pipeline: &DocRef) -> Result<String> {
        if let Some(version) = self.pipeline_versions.get(pipeline) {
            return Ok(version.value().clone());
        }
        let version = self.loader.pipeline_version(pipeline)?;
        self.pipeline_versions
            .insert(pipeline.clone(), version.clone());
        Ok(version)
    }

    /// Load `def` unless it is already complete. The loader takes the per
    /// stream lock itself, so concurrent callers collapse into one load.
    fn ensure_loaded(&self, def: &RefStreamDefinition, effective: &EffectiveMeta) -> Result<()> {
        if self.available_streams.contains(def) {
            return Ok(());
        }

        let state = self.store.get_load_state(def)?;
        if state != Some(ProcessingState::Complete) {
            tracing::debug!(
                "Loading {} effective at {} (state: {:?})",
                def,
                effective.effective_ms,
                state
            );
            self.loader.load(def)?;

            let state = self.store.get_load_state(def)?;
            if state != Some(ProcessingState::Complete) {
                return Err(RefDataError::Load(format!(
                    "{} is not complete after loading, state: {}",
                    def,
                    state.map_or("UNKNOWN", ProcessingState::display_name)
                )));
            }
        }

        self.available_streams.insert(def.clone());
        Ok(())
    }

    fn map_exists(&self, map_definition: &MapDefinition) -> Result<bool> {
        if let Some(exists) = self.map_existence.get(map_definition) {
            return Ok(*exists);
        }
        let exists = self.store.exists(map_definition)?;
        self.map_existence.insert(map_definition.clone(), exists);
        Ok(exists)
    }
}
