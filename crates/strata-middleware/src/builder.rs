//! Sequence resolution.
//!
//! [`PipelineBuilder`] turns the configured global list, groups and aliases
//! plus one [`RouteDeclaration`] into the exact ordered [`Sequence`] that
//! runs for that route:
//!
//! 1. the global list, in declared order
//! 2. the route's groups in declared order, expanded recursively
//! 3. the route's own entries
//! 4. aliases resolved to registered identities
//! 5. exclusions removed by identity (parameters ignored); the route's
//!    exclusions plus those of every group it entered
//! 6. duplicate (identity, parameters) pairs dropped, first occurrence
//!    kept, unless the unit is repeatable
//! 7. units named in the priority list reordered among the positions they
//!    already hold
//!
//! Every configuration problem surfaces as a [`BuildError`] before a
//! request is served.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strata_config::MiddlewareSettings;

use crate::declaration::Declaration;
use crate::error::BuildError;
use crate::middleware::Middleware;
use crate::registry::MiddlewareRegistry;
use crate::sequence::{Sequence, SequenceEntry};

/// The middleware part of a route definition.
///
/// # Example
///
/// ```
/// use strata_middleware::RouteDeclaration;
///
/// let route = RouteDeclaration::named("admin.posts")
///     .group("web")
///     .unit("role:admin")
///     .excluding("csrf");
///
/// assert_eq!(route.label(), "admin.posts");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteDeclaration {
    /// Route name used in logs, metrics and route tables.
    #[serde(default)]
    pub name: Option<String>,

    /// Groups the route belongs to, in order.
    #[serde(default)]
    pub groups: Vec<String>,

    /// Route-specific declarations, in order. Group names are expanded too.
    #[serde(default)]
    pub middleware: Vec<String>,

    /// Units or groups removed from this route.
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl RouteDeclaration {
    /// Creates an unnamed declaration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a named declaration.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Adds a group membership.
    #[must_use]
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    /// Adds a route-specific declaration.
    #[must_use]
    pub fn unit(mut self, declaration: impl Into<String>) -> Self {
        self.middleware.push(declaration.into());
        self
    }

    /// Excludes a unit or group.
    #[must_use]
    pub fn excluding(mut self, name: impl Into<String>) -> Self {
        self.exclude.push(name.into());
        self
    }

    /// The route name, or `anonymous`.
    #[must_use]
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("anonymous")
    }
}

/// Compiled sequences keyed by route name, in declaration order.
pub type RouteTable = IndexMap<String, Sequence>;

/// Resolves route declarations into sequences.
///
/// Construction checks every global and group entry, alias and priority
/// name against the registry, so a builder that exists can only fail on
/// problems inside a route declaration itself.
///
/// # Example
///
/// ```
/// use strata_config::{GroupSettings, MiddlewareSettings};
/// use strata_middleware::stages::{ErrorTranslation, RequestIdMiddleware};
/// use strata_middleware::{MiddlewareRegistry, PipelineBuilder, RouteDeclaration};
///
/// let registry = MiddlewareRegistry::new()
///     .with("request_id", RequestIdMiddleware::new())
///     .with("errors", ErrorTranslation::new());
///
/// let mut settings = MiddlewareSettings::default();
/// settings.append_global("request_id");
/// settings.groups.insert("api".into(), GroupSettings::new(["errors"]));
///
/// let builder = PipelineBuilder::new(settings, registry).unwrap();
/// let sequence = builder
///     .build_sequence(&RouteDeclaration::named("status").group("api"))
///     .unwrap();
///
/// assert_eq!(sequence.ids(), vec!["request_id", "errors"]);
/// ```
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    settings: MiddlewareSettings,
    registry: MiddlewareRegistry,
}

/// Declarations collected during expansion, with where each came from.
#[derive(Default)]
struct Expansion {
    units: Vec<(Declaration, String)>,
    exclude: Vec<(String, String)>,
}

impl PipelineBuilder {
    /// Validates `settings` against `registry` and creates the builder.
    ///
    /// # Errors
    ///
    /// Returns the first configuration problem found: structural errors from
    /// [`MiddlewareSettings::validate`], undefined names, aliases pointing at
    /// unregistered units, or parameters a unit rejects.
    pub fn new(settings: MiddlewareSettings, registry: MiddlewareRegistry) -> Result<Self, BuildError> {
        settings.validate()?;
        let builder = Self { settings, registry };
        builder.check_settings()?;

        tracing::debug!(
            units = builder.registry.len(),
            groups = builder.settings.groups.len(),
            aliases = builder.settings.aliases.len(),
            "pipeline builder ready"
        );
        Ok(builder)
    }

    /// The settings this builder resolves against.
    #[must_use]
    pub const fn settings(&self) -> &MiddlewareSettings {
        &self.settings
    }

    /// The registered units.
    #[must_use]
    pub const fn registry(&self) -> &MiddlewareRegistry {
        &self.registry
    }

    /// Resolves the sequence for one route.
    ///
    /// Deterministic: the same settings and declaration always produce the
    /// same sequence.
    ///
    /// # Errors
    ///
    /// Returns a [`BuildError`] if the declaration references an undefined
    /// group or unit, gives a group parameters, is malformed, or binds
    /// parameters a unit rejects.
    pub fn build_sequence(&self, route: &RouteDeclaration) -> Result<Sequence, BuildError> {
        let route_location = format!("route '{}'", route.label());
        let mut expansion = Expansion::default();
        let mut stack = Vec::new();

        self.expand(&self.settings.global, "global", &mut expansion, &mut stack)?;

        for raw in &route.groups {
            let decl = Declaration::parse(raw)?;
            if decl.has_params() {
                return Err(BuildError::GroupParameters {
                    group: decl.name().to_string(),
                });
            }
            if !self.settings.is_group(decl.name()) {
                return Err(BuildError::UndefinedGroup {
                    name: decl.name().to_string(),
                    location: route_location,
                });
            }
            self.expand_group(decl.name(), &mut expansion, &mut stack)?;
        }

        self.expand(&route.middleware, &route_location, &mut expansion, &mut stack)?;

        expansion.exclude.extend(
            route
                .exclude
                .iter()
                .map(|name| (name.clone(), route_location.clone())),
        );

        let mut entries = Vec::with_capacity(expansion.units.len());
        for (decl, location) in expansion.units {
            let (id, unit) = self.resolve_unit(decl.name(), &location)?;
            let (_, params) = decl.into_parts();
            entries.push(SequenceEntry::new(id, unit, params));
        }

        let excluded = self.excluded_ids(&expansion.exclude)?;
        entries.retain(|entry| !excluded.contains(entry.id()));

        let mut seen = HashSet::new();
        entries.retain(|entry| {
            entry.unit().repeatable() || seen.insert((entry.id().to_string(), entry.params().to_vec()))
        });

        self.apply_priority(&mut entries)?;

        for entry in &entries {
            entry
                .unit()
                .validate_params(entry.params())
                .map_err(|reason| BuildError::InvalidParameters {
                    unit: entry.id().to_string(),
                    reason,
                })?;
        }

        let sequence = Sequence::new(route.label(), entries);
        strata_telemetry::metrics::record_sequence_compiled();
        tracing::debug!(route = route.label(), units = ?sequence.labels(), "middleware sequence resolved");

        Ok(sequence)
    }

    /// Resolves every route of a table.
    ///
    /// Unnamed routes are keyed `#<index>`.
    ///
    /// # Errors
    ///
    /// Returns the first route's [`BuildError`], or
    /// [`BuildError::DuplicateRoute`] when two routes share a name.
    pub fn compile_routes<'r, I>(&self, routes: I) -> Result<RouteTable, BuildError>
    where
        I: IntoIterator<Item = &'r RouteDeclaration>,
    {
        let mut table = RouteTable::new();
        for (index, route) in routes.into_iter().enumerate() {
            let key = route.name.clone().unwrap_or_else(|| format!("#{index}"));
            if table.contains_key(&key) {
                return Err(BuildError::DuplicateRoute { name: key });
            }
            let sequence = self.build_sequence(route)?;
            table.insert(key, sequence);
        }
        tracing::info!(routes = table.len(), "route table compiled");
        Ok(table)
    }

    fn expand(
        &self,
        entries: &[String],
        location: &str,
        out: &mut Expansion,
        stack: &mut Vec<String>,
    ) -> Result<(), BuildError> {
        for raw in entries {
            let decl = Declaration::parse(raw)?;
            if self.settings.is_group(decl.name()) {
                if decl.has_params() {
                    return Err(BuildError::GroupParameters {
                        group: decl.name().to_string(),
                    });
                }
                self.expand_group(decl.name(), out, stack)?;
            } else {
                out.units.push((decl, location.to_string()));
            }
        }
        Ok(())
    }

    fn expand_group(&self, name: &str, out: &mut Expansion, stack: &mut Vec<String>) -> Result<(), BuildError> {
        if let Some(start) = stack.iter().position(|group| group == name) {
            let mut cycle = stack[start..].to_vec();
            cycle.push(name.to_string());
            return Err(BuildError::CyclicGroup { cycle });
        }

        let Some(group) = self.settings.group(name) else {
            return Err(BuildError::UndefinedGroup {
                name: name.to_string(),
                location: stack
                    .last()
                    .map_or_else(|| "global".to_string(), |parent| format!("group '{parent}'")),
            });
        };

        let location = format!("group '{name}'");
        out.exclude
            .extend(group.exclude.iter().map(|excluded| (excluded.clone(), location.clone())));

        stack.push(name.to_string());
        self.expand(&group.middleware, &location, out, stack)?;
        stack.pop();

        Ok(())
    }

    fn resolve_unit(
        &self,
        name: &str,
        location: &str,
    ) -> Result<(String, Arc<dyn Middleware>), BuildError> {
        if let Some(target) = self.settings.aliases.get(name) {
            return self
                .registry
                .get(target)
                .map(|unit| (target.clone(), unit.clone()))
                .ok_or_else(|| BuildError::UnregisteredUnit {
                    alias: name.to_string(),
                    target: target.clone(),
                });
        }

        self.registry
            .get(name)
            .map(|unit| (name.to_string(), unit.clone()))
            .ok_or_else(|| BuildError::UndefinedMiddleware {
                name: name.to_string(),
                location: location.to_string(),
            })
    }

    /// Identities removed by the given exclusion entries. A group name
    /// excludes every unit the group expands to.
    fn excluded_ids(&self, exclude: &[(String, String)]) -> Result<HashSet<String>, BuildError> {
        let mut ids = HashSet::new();
        for (raw, location) in exclude {
            let decl = Declaration::parse(raw)?;
            if self.settings.is_group(decl.name()) {
                let mut members = Expansion::default();
                self.expand_group(decl.name(), &mut members, &mut Vec::new())?;
                for (member, member_location) in members.units {
                    ids.insert(self.resolve_unit(member.name(), &member_location)?.0);
                }
            } else {
                ids.insert(self.resolve_unit(decl.name(), location)?.0);
            }
        }
        Ok(ids)
    }

    fn apply_priority(&self, entries: &mut [SequenceEntry]) -> Result<(), BuildError> {
        if self.settings.priority.is_empty() {
            return Ok(());
        }

        let mut rank = HashMap::new();
        for (position, name) in self.settings.priority.iter().enumerate() {
            let (id, _) = self.resolve_unit(name, "priority")?;
            rank.entry(id).or_insert(position);
        }

        let slots: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| rank.contains_key(entry.id()))
            .map(|(index, _)| index)
            .collect();

        let mut prioritized: Vec<SequenceEntry> = slots.iter().map(|&index| entries[index].clone()).collect();
        prioritized.sort_by_key(|entry| rank[entry.id()]);

        for (slot, entry) in slots.into_iter().zip(prioritized) {
            entries[slot] = entry;
        }
        Ok(())
    }

    fn check_settings(&self) -> Result<(), BuildError> {
        for (alias, target) in &self.settings.aliases {
            if !self.registry.contains(target) {
                return Err(BuildError::UnregisteredUnit {
                    alias: alias.clone(),
                    target: target.clone(),
                });
            }
        }

        let mut expansion = Expansion::default();
        self.expand(&self.settings.global, "global", &mut expansion, &mut Vec::new())?;
        for name in self.settings.groups.keys() {
            self.expand_group(name, &mut expansion, &mut Vec::new())?;
        }

        for (decl, location) in &expansion.units {
            let (id, unit) = self.resolve_unit(decl.name(), location)?;
            unit.validate_params(decl.params())
                .map_err(|reason| BuildError::InvalidParameters { unit: id, reason })?;
        }
        self.excluded_ids(&expansion.exclude)?;

        for name in &self.settings.priority {
            self.resolve_unit(name, "priority")?;
        }

        Ok(())
    }
}
