//! Outcome of one reference data lookup

use refdata_core::{
    error::Result,
    types::{EffectiveMeta, LookupIdentifier, PipelineReference, RefDataValue},
};
use refdata_lmdb::RefDataValueProxy;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => f.write_str("INFO"),
            Severity::Warning => f.write_str("WARNING"),
            Severity::Error => f.write_str("ERROR"),
        }
    }
}

/// Effective stream chosen for one pipeline reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveStreamMatch {
    pub pipeline_reference: PipelineReference,
    pub effective_meta: EffectiveMeta,
}

/// Everything a lookup decided, plus the (still unresolved) value.
///
/// Messages explain each step: a reference with no effective stream, a map
/// missing from a stream, a broken link in a nested chain.
#[derive(Debug)]
pub struct ReferenceDataResult {
    lookup_identifier: LookupIdentifier,
    current_lookup_identifier: LookupIdentifier,
    effective_streams: Vec<EffectiveStreamMatch>,
    proxy: Option<RefDataValueProxy>,
    messages: Vec<(Severity, String)>,
}

impl ReferenceDataResult {
    pub fn new(lookup_identifier: LookupIdentifier) -> Self {
        Self {
            current_lookup_identifier: lookup_identifier.clone(),
            lookup_identifier,
            effective_streams: Vec::new(),
            proxy: None,
            messages: Vec::new(),
        }
    }

    /// The lookup as requested
    pub fn lookup_identifier(&self) -> &LookupIdentifier {
        &self.lookup_identifier
    }

    /// The link of a nested chain being (or last) resolved
    pub fn current_lookup_identifier(&self) -> &LookupIdentifier {
        &self.current_lookup_identifier
    }

    pub(crate) fn set_current_lookup_identifier(&mut self, lookup_identifier: LookupIdentifier) {
        self.current_lookup_identifier = lookup_identifier;
    }

    pub fn effective_streams(&self) -> &[EffectiveStreamMatch] {
        &self.effective_streams
    }

    pub(crate) fn add_effective_stream(
        &mut self,
        pipeline_reference: PipelineReference,
        effective_meta: EffectiveMeta,
    ) {
        self.effective_streams.push(EffectiveStreamMatch {
            pipeline_reference,
            effective_meta,
        });
    }

    pub fn proxy(&self) -> Option<&RefDataValueProxy> {
        self.proxy.as_ref()
    }

    pub fn has_proxy(&self) -> bool {
        self.proxy.is_some()
    }

    pub(crate) fn set_proxy(&mut self, proxy: RefDataValueProxy) {
        self.proxy = Some(proxy);
    }

    pub(crate) fn take_proxy(&mut self) -> Option<RefDataValueProxy> {
        self.proxy.take()
    }

    /// Resolve the value. `None` when nothing was found.
    pub fn supply_value(&self) -> Result<Option<RefDataValue>> {
        match &self.proxy {
            Some(proxy) => proxy.supply_value(),
            None => Ok(None),
        }
    }

    pub fn messages(&self) -> &[(Severity, String)] {
        &self.messages
    }

    pub fn max_severity(&self) -> Option<Severity> {
        self.messages.iter().map(|(severity, _)| *severity).max()
    }

    pub fn log(&mut self, severity: Severity, message: impl Into<String>) {
        let message = message.into();
        match severity {
            Severity::Error => tracing::warn!("{}: {}", self.current_lookup_identifier, message),
            _ => tracing::debug!("{}: {}", self.current_lookup_identifier, message),
        }
        self.messages.push((severity, message));
    }
}
