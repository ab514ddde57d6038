//! Command gate
//!
//! Decides whether a command may run for a given invocation: guild-wide
//! switches first, then user, role and channel overrides, then the command's
//! default, and finally a capability check on permission bits.

use crate::moderation::{CommandSettings, ModerationError, ModerationResult};
use derive_more::Display;
use poise::serenity_prelude::{ChannelId, Permissions, RoleId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// What an override applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id")]
pub enum OverrideScope {
    User(UserId),
    Role(RoleId),
    Channel(ChannelId),
}

impl OverrideScope {
    #[must_use]
    pub const fn kind(&self) -> ScopeKind {
        match self {
            Self::User(_) => ScopeKind::User,
            Self::Role(_) => ScopeKind::Role,
            Self::Channel(_) => ScopeKind::Channel,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ScopeKind {
    #[display("user")]
    User,
    #[display("role")]
    Role,
    #[display("channel")]
    Channel,
}

/// An explicit enable/disable rule for a command or category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOverride {
    /// Command or category name
    pub name: String,
    pub scope: OverrideScope,
    pub enabled: bool,
}

impl CommandOverride {
    pub fn new(name: impl Into<String>, scope: OverrideScope, enabled: bool) -> Self {
        Self {
            name: name.into().to_lowercase(),
            scope,
            enabled,
        }
    }
}

/// Overrides indexed by (name, scope); at most one per pair
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<CommandOverride>", into = "Vec<CommandOverride>")]
pub struct OverrideTable {
    entries: HashMap<(String, OverrideScope), bool>,
}

impl OverrideTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an override, returning the previous flag
    pub fn set(&mut self, entry: CommandOverride) -> Option<bool> {
        self.entries
            .insert((entry.name.to_lowercase(), entry.scope), entry.enabled)
    }

    /// The flag for `name` in `scope`, if overridden
    #[must_use]
    pub fn get(&self, name: &str, scope: OverrideScope) -> Option<bool> {
        self.entries.get(&(name.to_lowercase(), scope)).copied()
    }

    pub fn remove(&mut self, name: &str, scope: OverrideScope) -> Option<bool> {
        self.entries.remove(&(name.to_lowercase(), scope))
    }

    /// Remove every override for `name`, returning how many were removed
    pub fn remove_name(&mut self, name: &str) -> usize {
        let name = name.to_lowercase();
        self.retain(|entry_name, _| entry_name != name)
    }

    /// Keep only overrides matching `keep`, returning how many were removed
    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&str, &OverrideScope) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|(name, scope), _| keep(name, scope));
        before - self.entries.len()
    }

    /// Distinct scopes referenced by any override
    #[must_use]
    pub fn scopes(&self) -> HashSet<OverrideScope> {
        self.entries.keys().map(|(_, scope)| *scope).collect()
    }

    /// All overrides, sorted by name then scope
    #[must_use]
    pub fn to_vec(&self) -> Vec<CommandOverride> {
        let mut overrides: Vec<_> = self
            .entries
            .iter()
            .map(|((name, scope), enabled)| CommandOverride {
                name: name.clone(),
                scope: *scope,
                enabled: *enabled,
            })
            .collect();
        overrides.sort_by(|a, b| (&a.name, a.scope).cmp(&(&b.name, b.scope)));
        overrides
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<Vec<CommandOverride>> for OverrideTable {
    fn from(overrides: Vec<CommandOverride>) -> Self {
        let mut table = Self::new();
        for entry in overrides {
            table.set(entry);
        }
        table
    }
}

impl From<OverrideTable> for Vec<CommandOverride> {
    fn from(table: OverrideTable) -> Self {
        table.to_vec()
    }
}

/// Static description of a command the gate knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandInfo {
    pub name: &'static str,
    pub category: &'static str,
    pub default_enabled: bool,
    /// Holding every one of these bits satisfies the capability check
    pub all_of: Permissions,
    /// Holding any one of these bits satisfies the capability check
    pub any_of: Permissions,
    /// Exempt commands can never be disabled
    pub exempt: bool,
}

impl CommandInfo {
    /// An enabled command with no permission requirements
    #[must_use]
    pub const fn new(name: &'static str, category: &'static str) -> Self {
        Self {
            name,
            category,
            default_enabled: true,
            all_of: Permissions::empty(),
            any_of: Permissions::empty(),
            exempt: false,
        }
    }

    #[must_use]
    pub const fn all_of(self, all_of: Permissions) -> Self {
        Self { all_of, ..self }
    }

    #[must_use]
    pub const fn any_of(self, any_of: Permissions) -> Self {
        Self { any_of, ..self }
    }

    #[must_use]
    pub const fn disabled_by_default(self) -> Self {
        Self {
            default_enabled: false,
            ..self
        }
    }

    #[must_use]
    pub const fn exempt(self) -> Self {
        Self {
            exempt: true,
            ..self
        }
    }

    /// Check `effective` against the requirement sets, returning the missing
    /// bits on failure
    pub fn check_capability(&self, effective: Permissions) -> Result<(), Permissions> {
        if self.all_of.is_empty() && self.any_of.is_empty() {
            return Ok(());
        }
        if effective.contains(Permissions::ADMINISTRATOR) {
            return Ok(());
        }
        if !self.all_of.is_empty() && effective.contains(self.all_of) {
            return Ok(());
        }
        if !self.any_of.is_empty() && effective.intersects(self.any_of) {
            return Ok(());
        }

        if self.all_of.is_empty() {
            Err(self.any_of)
        } else {
            Err(self.all_of.difference(effective))
        }
    }
}

/// Every command the gate can be asked about
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    commands: HashMap<String, CommandInfo>,
    categories: HashSet<String>,
}

impl CommandRegistry {
    #[must_use]
    pub fn new(commands: &[CommandInfo]) -> Self {
        Self {
            commands: commands
                .iter()
                .map(|info| (info.name.to_lowercase(), *info))
                .collect(),
            categories: commands
                .iter()
                .map(|info| info.category.to_lowercase())
                .collect(),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CommandInfo> {
        self.commands.get(&name.to_lowercase())
    }

    /// Whether `name` is a command or a category
    #[must_use]
    pub fn is_known(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.commands.contains_key(&name) || self.categories.contains(&name)
    }

    /// Normalise a name that is about to be disabled or overridden
    pub fn configurable_name(&self, name: &str) -> ModerationResult<String> {
        let normalized = name.trim().to_lowercase();
        if !self.is_known(&normalized) {
            return Err(ModerationError::UnknownCommand(name.to_string()));
        }
        if self.get(&normalized).is_some_and(|info| info.exempt) {
            return Err(ModerationError::ExemptCommand(normalized));
        }
        Ok(normalized)
    }
}

/// One of the actor's roles, with its position in the guild's role list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorRole {
    pub id: RoleId,
    pub position: u16,
}

/// Everything the gate needs to know about a command invocation
#[derive(Debug, Clone)]
pub struct CommandInvocation {
    pub actor: UserId,
    pub command: String,
    /// Used when the registry does not know the command
    pub category: Option<String>,
    pub channel: ChannelId,
    pub roles: Vec<ActorRole>,
    /// Platform-granted permission bits
    pub permissions: Permissions,
}

/// Why a command was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// An override for this scope disables the command
    Disabled(ScopeKind),
    /// No override applies and the command is off by default
    DisabledByDefault,
    MissingPermissions(Permissions),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled(scope) => {
                write!(f, "This command is disabled for this {scope}.")
            }
            Self::DisabledByDefault => write!(f, "This command is disabled."),
            Self::MissingPermissions(missing) => {
                let names: Vec<_> = missing.iter_names().map(|(name, _)| name).collect();
                write!(f, "You are missing permissions: {}", names.join(", "))
            }
        }
    }
}

/// Outcome of gating a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateVerdict {
    Allowed,
    /// Refused without telling the invoker anything
    Suppressed,
    /// Refused with a reason the invoker may see
    Rejected(Rejection),
}

/// Evaluates invocations against one guild's command settings
pub struct CommandGate<'a> {
    registry: &'a CommandRegistry,
    settings: &'a CommandSettings,
}

impl<'a> CommandGate<'a> {
    #[must_use]
    pub const fn new(registry: &'a CommandRegistry, settings: &'a CommandSettings) -> Self {
        Self { registry, settings }
    }

    /// Decide whether the invocation may proceed
    #[must_use]
    pub fn evaluate(&self, invocation: &CommandInvocation) -> GateVerdict {
        let command = invocation.command.to_lowercase();
        let info = self
            .registry
            .get(&command)
            .copied()
            .unwrap_or(CommandInfo::new("", ""));
        let category = if info.category.is_empty() {
            invocation.category.clone().unwrap_or_default().to_lowercase()
        } else {
            info.category.to_lowercase()
        };

        if !info.exempt {
            if self.settings.is_disabled(&command)
                || (!category.is_empty() && self.settings.is_disabled(&category))
            {
                return GateVerdict::Suppressed;
            }

            let names: Vec<&str> = [command.as_str(), category.as_str()]
                .into_iter()
                .filter(|name| !name.is_empty())
                .collect();
            match self.resolve_override(&names, invocation) {
                Some((false, scope)) => return GateVerdict::Rejected(Rejection::Disabled(scope)),
                Some((true, _)) => {}
                None if !info.default_enabled => {
                    return GateVerdict::Rejected(Rejection::DisabledByDefault);
                }
                None => {}
            }
        }

        let effective =
            invocation.permissions | self.settings.extra_permissions_for(invocation.actor);
        match info.check_capability(effective) {
            Ok(()) => GateVerdict::Allowed,
            Err(missing) => GateVerdict::Rejected(Rejection::MissingPermissions(missing)),
        }
    }

    /// The authoritative override for the first of `names` found at the most
    /// specific scope, with the scope it came from
    #[must_use]
    pub fn resolve_override(
        &self,
        names: &[&str],
        invocation: &CommandInvocation,
    ) -> Option<(bool, ScopeKind)> {
        let table = &self.settings.overrides;

        let by_user = names
            .iter()
            .find_map(|name| table.get(name, OverrideScope::User(invocation.actor)));
        if let Some(enabled) = by_user {
            return Some((enabled, ScopeKind::User));
        }

        // highest position wins, the newer role (larger id) breaks ties
        let by_role = names.iter().find_map(|name| {
            invocation
                .roles
                .iter()
                .filter_map(|role| {
                    table
                        .get(name, OverrideScope::Role(role.id))
                        .map(|enabled| (role, enabled))
                })
                .max_by_key(|(role, _)| (role.position, role.id))
                .map(|(_, enabled)| enabled)
        });
        if let Some(enabled) = by_role {
            return Some((enabled, ScopeKind::Role));
        }

        names
            .iter()
            .find_map(|name| table.get(name, OverrideScope::Channel(invocation.channel)))
            .map(|enabled| (enabled, ScopeKind::Channel))
    }
}
