//! Descriptor catalog and discovery.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::debug;

use keel_protocols::{KernelError, SystemKey};

use crate::descriptor::SystemDescriptor;

/// Why a declared descriptor was left out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Not marked for the automatic scan.
    NotAutoRegistered,
    /// Its conditional-enable symbol is inactive.
    InactiveSymbol(String),
    /// Disabled by configuration.
    Disabled,
    /// Depends on a system that was itself skipped.
    DependencyDisabled(String),
    /// Depends on a system that failed to construct or initialize.
    DependencyFailed(String),
    /// A fallback whose contracts the named system already provides.
    Overridden(String),
}

/// A descriptor left out of resolution, with the reason.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedSystem {
    pub name: String,
    pub reason: SkipReason,
}

/// Switches that decide which declared descriptors take part.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOptions {
    /// Active conditional-enable symbols.
    pub symbols: HashSet<String>,
    /// Systems disabled by name or alias.
    pub disabled: HashSet<String>,
    /// Priority overrides by name or alias.
    pub priority_overrides: HashMap<String, i32>,
    /// Only pick up descriptors marked for the automatic scan.
    pub require_auto_register: bool,
}

impl DiscoveryOptions {
    fn is_disabled(&self, descriptor: &SystemDescriptor) -> bool {
        self.disabled.iter().any(|name| descriptor.matches(name))
    }

    fn priority_override(&self, descriptor: &SystemDescriptor) -> Option<i32> {
        descriptor
            .alias()
            .and_then(|alias| self.priority_overrides.get(alias))
            .or_else(|| self.priority_overrides.get(descriptor.name()))
            .or_else(|| self.priority_overrides.get(descriptor.key().type_name()))
            .copied()
    }
}

/// Result of discovery: the descriptors that take part, in declaration
/// order, and the ones that were filtered out.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    pub candidates: Vec<SystemDescriptor>,
    pub filtered: Vec<(SystemDescriptor, SkipReason)>,
}

impl Discovery {
    /// Whether `key` was declared but filtered out.
    pub fn is_filtered(&self, key: &SystemKey) -> bool {
        self.filtered.iter().any(|(d, _)| d.key() == *key)
    }
}

struct CatalogEntry {
    descriptor: SystemDescriptor,
    manual: bool,
}

/// Holds every declared descriptor before any instance exists.
///
/// Declaration order is the discovery order used to break priority ties.
#[derive(Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a descriptor for the automatic scan.
    pub fn declare(&mut self, descriptor: SystemDescriptor) -> &mut Self {
        self.entries.push(CatalogEntry {
            descriptor,
            manual: false,
        });
        self
    }

    /// Declare a descriptor that is always discovered, whether or not it is
    /// marked for the automatic scan.
    pub fn declare_manual(&mut self, descriptor: SystemDescriptor) -> &mut Self {
        self.entries.push(CatalogEntry {
            descriptor,
            manual: true,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &SystemDescriptor> {
        self.entries.iter().map(|e| &e.descriptor)
    }

    pub fn find(&self, name: &str) -> Option<&SystemDescriptor> {
        self.descriptors().find(|d| d.matches(name))
    }

    /// Apply `options` to the declared descriptors.
    ///
    /// Fails with `DuplicateRegistration` when the same type was declared
    /// more than once.
    pub fn discover(&self, options: &DiscoveryOptions) -> Result<Discovery, KernelError> {
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for entry in &self.entries {
            let key = entry.descriptor.key();
            if !seen.insert(key) && !duplicates.contains(&entry.descriptor.name()) {
                duplicates.push(entry.descriptor.name());
            }
        }
        if !duplicates.is_empty() {
            return Err(KernelError::DuplicateRegistration(duplicates.join(", ")));
        }

        let mut discovery = Discovery::default();
        for entry in &self.entries {
            let mut descriptor = entry.descriptor.clone();
            if let Some(priority) = options.priority_override(&descriptor) {
                debug!(system = descriptor.name(), priority, "Priority overridden");
                descriptor.set_priority(priority);
            }

            let skip = if options.require_auto_register
                && !entry.manual
                && !descriptor.is_auto_register()
            {
                Some(SkipReason::NotAutoRegistered)
            } else if options.is_disabled(&descriptor) {
                Some(SkipReason::Disabled)
            } else {
                descriptor
                    .symbol()
                    .filter(|symbol| !options.symbols.contains(*symbol))
                    .map(|symbol| SkipReason::InactiveSymbol(symbol.to_string()))
            };

            match skip {
                Some(reason) => {
                    debug!(system = descriptor.name(), ?reason, "System skipped during discovery");
                    discovery.filtered.push((descriptor, reason));
                }
                None => discovery.candidates.push(descriptor),
            }
        }

        discovery.drop_overridden_fallbacks();
        Ok(discovery)
    }
}

impl Discovery {
    /// Keep a fallback only while at least one of its contracts has no other
    /// provider. Non-fallback providers win; among fallbacks the first
    /// declared wins.
    fn drop_overridden_fallbacks(&mut self) {
        let mut providers: HashMap<SystemKey, &'static str> = HashMap::new();
        for descriptor in self.candidates.iter().filter(|d| !d.is_fallback()) {
            for contract in descriptor.contracts() {
                providers.entry(contract.key()).or_insert(descriptor.name());
            }
        }

        let candidates = std::mem::take(&mut self.candidates);
        for descriptor in candidates {
            if !descriptor.is_fallback() {
                self.candidates.push(descriptor);
                continue;
            }

            let keys: Vec<SystemKey> = descriptor.contracts().iter().map(|c| c.key()).collect();
            let open = keys.is_empty() || keys.iter().any(|key| !providers.contains_key(key));
            if open {
                for key in keys {
                    providers.entry(key).or_insert(descriptor.name());
                }
                self.candidates.push(descriptor);
                continue;
            }

            let provider = keys
                .first()
                .and_then(|key| providers.get(key))
                .copied()
                .unwrap_or_default();
            debug!(system = descriptor.name(), provider, "Fallback overridden");
            self.filtered
                .push((descriptor, SkipReason::Overridden(provider.to_string())));
        }
    }
}
