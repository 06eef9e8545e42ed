//! Mechanism name → constructor lookup.
//!
//! Both short (`rr`) and long (`round_robin`) names resolve. Unknown
//! names are a hard configuration error at apply time, never a runtime
//! fallback.

use crate::alb::mech::{
    FirstResponse, NewestLastModified, RoundRobin, TimeSeriesMerge, UserRouter,
};
use crate::alb::{FactoryContext, Mechanism, MechanismId};
use crate::config::ConfigError;

type Ctor = fn(&FactoryContext) -> Result<Box<dyn Mechanism>, ConfigError>;

pub struct RegistryEntry {
    pub id: MechanismId,
    pub name: &'static str,
    pub short_name: &'static str,
    ctor: Ctor,
}

impl RegistryEntry {
    pub fn build(&self, ctx: &FactoryContext) -> Result<Box<dyn Mechanism>, ConfigError> {
        (self.ctor)(ctx)
    }
}

fn new_round_robin(_ctx: &FactoryContext) -> Result<Box<dyn Mechanism>, ConfigError> {
    Ok(Box::new(RoundRobin::new()))
}

fn new_first_response(_ctx: &FactoryContext) -> Result<Box<dyn Mechanism>, ConfigError> {
    Ok(Box::new(FirstResponse::new()))
}

fn new_first_good_response(ctx: &FactoryContext) -> Result<Box<dyn Mechanism>, ConfigError> {
    let codes = ctx.config.fgr_status_codes.clone().unwrap_or_default();
    Ok(Box::new(FirstResponse::new_fgr(codes)))
}

fn new_newest_last_modified(_ctx: &FactoryContext) -> Result<Box<dyn Mechanism>, ConfigError> {
    Ok(Box::new(NewestLastModified::new()))
}

fn new_time_series_merge(ctx: &FactoryContext) -> Result<Box<dyn Mechanism>, ConfigError> {
    let format = ctx
        .config
        .output_format
        .as_deref()
        .ok_or_else(|| ConfigError::Invalid("time_series_merge requires output_format".into()))?;
    Ok(Box::new(TimeSeriesMerge::new(
        format,
        ctx.providers,
        ctx.config.concurrency_limit,
    )?))
}

fn new_user_router(ctx: &FactoryContext) -> Result<Box<dyn Mechanism>, ConfigError> {
    let config = ctx
        .config
        .user_router
        .as_ref()
        .ok_or_else(|| ConfigError::Invalid("user_router requires an [alb.user_router] table".into()))?;
    Ok(Box::new(UserRouter::new(
        config,
        ctx.backends,
        ctx.authenticator.clone(),
    )?))
}

/// The registry of every known mechanism.
pub struct MechanismRegistry {
    entries: Vec<RegistryEntry>,
}

impl MechanismRegistry {
    pub fn new() -> Self {
        Self {
            entries: vec![
                RegistryEntry {
                    id: MechanismId::RoundRobin,
                    name: "round_robin",
                    short_name: "rr",
                    ctor: new_round_robin,
                },
                RegistryEntry {
                    id: MechanismId::FirstResponse,
                    name: "first_response",
                    short_name: "fr",
                    ctor: new_first_response,
                },
                RegistryEntry {
                    id: MechanismId::FirstGoodResponse,
                    name: "first_good_response",
                    short_name: "fgr",
                    ctor: new_first_good_response,
                },
                RegistryEntry {
                    id: MechanismId::NewestLastModified,
                    name: "newest_last_modified",
                    short_name: "nlm",
                    ctor: new_newest_last_modified,
                },
                RegistryEntry {
                    id: MechanismId::TimeSeriesMerge,
                    name: "time_series_merge",
                    short_name: "tsm",
                    ctor: new_time_series_merge,
                },
                RegistryEntry {
                    id: MechanismId::UserRouter,
                    name: "user_router",
                    short_name: "ur",
                    ctor: new_user_router,
                },
            ],
        }
    }

    /// Resolve a short or long mechanism name.
    pub fn resolve(&self, name: &str) -> Option<&RegistryEntry> {
        self.entries
            .iter()
            .find(|e| e.name == name || e.short_name == name)
    }

    pub fn known_names(&self) -> Vec<&'static str> {
        self.entries
            .iter()
            .flat_map(|e| [e.short_name, e.name])
            .collect()
    }
}

impl Default for MechanismRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AlbConfig;
    use crate::timeseries::ProviderRegistry;
    use std::collections::HashMap;

    fn ctx<'a>(
        config: &'a AlbConfig,
        backends: &'a HashMap<String, crate::proxy::SharedHandler>,
        providers: &'a ProviderRegistry,
    ) -> FactoryContext<'a> {
        FactoryContext {
            config,
            backends,
            providers,
            authenticator: None,
        }
    }

    #[test]
    fn test_short_and_long_names_resolve() {
        let reg = MechanismRegistry::new();
        for (short, long) in [
            ("rr", "round_robin"),
            ("fr", "first_response"),
            ("fgr", "first_good_response"),
            ("nlm", "newest_last_modified"),
            ("tsm", "time_series_merge"),
            ("ur", "user_router"),
        ] {
            let a = reg.resolve(short).unwrap();
            let b = reg.resolve(long).unwrap();
            assert_eq!(a.id, b.id);
        }
        assert!(reg.resolve("nope").is_none());
        assert_eq!(reg.known_names().len(), 12);
    }

    #[test]
    fn test_builds_resolve_to_matching_mechanisms() {
        let reg = MechanismRegistry::new();
        let backends = HashMap::new();
        let providers = ProviderRegistry::new();
        let mut config = AlbConfig::default();
        config.output_format = Some("prometheus".to_string());

        for name in ["rr", "fr", "fgr", "nlm", "tsm"] {
            let entry = reg.resolve(name).unwrap();
            let mech = entry.build(&ctx(&config, &backends, &providers)).unwrap();
            assert_eq!(mech.id(), entry.id, "{name}");
        }
    }

    #[test]
    fn test_tsm_requires_output_format() {
        let reg = MechanismRegistry::new();
        let backends = HashMap::new();
        let providers = ProviderRegistry::new();
        let config = AlbConfig::default();
        let entry = reg.resolve("tsm").unwrap();
        assert!(entry.build(&ctx(&config, &backends, &providers)).is_err());
    }

    #[test]
    fn test_ur_requires_router_table() {
        let reg = MechanismRegistry::new();
        let backends = HashMap::new();
        let providers = ProviderRegistry::new();
        let config = AlbConfig::default();
        let entry = reg.resolve("ur").unwrap();
        assert!(entry.build(&ctx(&config, &backends, &providers)).is_err());
    }
}
