use std::path::PathBuf;
use std::rc::Rc;

use hunt_engine::sim::{
    GenerationTally, MemoryRemote, SimEntitlements, SimGenerationEndpoint, SimPaymentProcessor,
};
use hunt_engine::{
    CacheError, Clock, ConfigError, EngineConfig, EntitlementStatus, HuntSession, LatLng, LocalCache,
    OwnerId, PaymentOutcome, SessionParts, StorageBackend, SystemClock,
};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

const CONFIG_ENV_VAR: &str = "HUNT_CONFIG";
const CACHE_ENV_VAR: &str = "HUNT_CACHE";
const OWNER_ENV_VAR: &str = "HUNT_OWNER";
const BACKEND_ENV_VAR: &str = "HUNT_BACKEND";
const PRIVILEGED_ENV_VAR: &str = "HUNT_PRIVILEGED";
const SUBSCRIBED_ENV_VAR: &str = "HUNT_SUBSCRIBED";
const PAYMENT_ENV_VAR: &str = "HUNT_PAYMENT";
const DEFAULT_OWNER: &str = "demo-owner";
const DEFAULT_MAP_CENTER: LatLng = LatLng {
    lat: 41.8902,
    lng: 12.4922,
};

pub(crate) type ConsoleSession =
    HuntSession<MemoryRemote, SimEntitlements, SimPaymentProcessor, SimGenerationEndpoint>;

#[derive(Debug, Error)]
pub(crate) enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("invalid {name}='{value}' (expected {expected})")]
    Env {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error("console registry: {0}")]
    Console(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BackendChoice {
    Remote,
    Local,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AppSettings {
    pub(crate) config_path: Option<PathBuf>,
    pub(crate) cache_path: Option<PathBuf>,
    pub(crate) owner: OwnerId,
    pub(crate) backend: BackendChoice,
    pub(crate) entitlement: EntitlementStatus,
    pub(crate) payment: PaymentOutcome,
}

impl AppSettings {
    pub(crate) fn from_env() -> Result<Self, StartupError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StartupError> {
        let non_empty = |name: &str| {
            lookup(name)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };

        let backend = match non_empty(BACKEND_ENV_VAR).as_deref() {
            None | Some("remote") => BackendChoice::Remote,
            Some("local") => BackendChoice::Local,
            Some(other) => {
                return Err(StartupError::Env {
                    name: BACKEND_ENV_VAR,
                    value: other.to_string(),
                    expected: "remote|local",
                })
            }
        };
        let payment = match non_empty(PAYMENT_ENV_VAR).as_deref() {
            None | Some("approve") => PaymentOutcome::Confirmed,
            Some("decline") => PaymentOutcome::Declined("card declined".to_string()),
            Some("cancel") => PaymentOutcome::Cancelled,
            Some(other) => {
                return Err(StartupError::Env {
                    name: PAYMENT_ENV_VAR,
                    value: other.to_string(),
                    expected: "approve|decline|cancel",
                })
            }
        };

        Ok(Self {
            config_path: non_empty(CONFIG_ENV_VAR).map(PathBuf::from),
            cache_path: non_empty(CACHE_ENV_VAR).map(PathBuf::from),
            owner: OwnerId::new(non_empty(OWNER_ENV_VAR).unwrap_or_else(|| DEFAULT_OWNER.into())),
            backend,
            entitlement: EntitlementStatus {
                active_subscription: is_flag_set(non_empty(SUBSCRIBED_ENV_VAR)),
                privileged: is_flag_set(non_empty(PRIVILEGED_ENV_VAR)),
            },
            payment,
        })
    }
}

fn is_flag_set(raw: Option<String>) -> bool {
    matches!(raw.as_deref(), Some("1" | "true" | "yes"))
}

pub(crate) fn build_session(settings: &AppSettings) -> Result<ConsoleSession, StartupError> {
    let config = match &settings.config_path {
        Some(path) => EngineConfig::load_from_path(path)?,
        None => EngineConfig::default(),
    };
    let cache = match &settings.cache_path {
        Some(path) => LocalCache::open(path)?,
        None => LocalCache::ephemeral(),
    };
    // The endpoint numbers generations from whichever store the session syncs with.
    let (backend, tally): (_, Rc<dyn GenerationTally>) = match settings.backend {
        BackendChoice::Remote => {
            let remote = MemoryRemote::new();
            let tally = Rc::new(remote.clone());
            (StorageBackend::Remote(remote), tally)
        }
        BackendChoice::Local => (StorageBackend::LocalOnly, Rc::new(cache.clone())),
    };
    let clock: Rc<dyn Clock> = Rc::new(SystemClock);
    let endpoint = SimGenerationEndpoint::new(tally, &config, clock.clone());
    info!(
        owner = %settings.owner,
        backend = backend.label(),
        counter_scope = ?config.counter_scope,
        privileged = settings.entitlement.privileged,
        subscribed = settings.entitlement.active_subscription,
        "session_configured"
    );

    Ok(HuntSession::new(
        config,
        SessionParts {
            owner: settings.owner.clone(),
            backend,
            cache,
            entitlements: SimEntitlements::new(settings.entitlement),
            payments: SimPaymentProcessor::with_outcome(settings.payment.clone()),
            endpoint,
            clock,
            map_center: DEFAULT_MAP_CENTER,
        },
    ))
}

pub(crate) fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings_from(pairs: &[(&str, &str)]) -> Result<AppSettings, StartupError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        AppSettings::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_to_remote_demo_owner_paying_customer() {
        let settings = settings_from(&[]).expect("settings");
        assert_eq!(settings.owner, OwnerId::new(DEFAULT_OWNER));
        assert_eq!(settings.backend, BackendChoice::Remote);
        assert_eq!(settings.entitlement, EntitlementStatus::default());
        assert_eq!(settings.payment, PaymentOutcome::Confirmed);
        assert_eq!(settings.config_path, None);
    }

    #[test]
    fn reads_role_backend_and_payment_choice() {
        let settings = settings_from(&[
            (OWNER_ENV_VAR, " scout "),
            (BACKEND_ENV_VAR, "local"),
            (PRIVILEGED_ENV_VAR, "1"),
            (PAYMENT_ENV_VAR, "cancel"),
        ])
        .expect("settings");
        assert_eq!(settings.owner, OwnerId::new("scout"));
        assert_eq!(settings.backend, BackendChoice::Local);
        assert!(settings.entitlement.privileged);
        assert!(!settings.entitlement.active_subscription);
        assert_eq!(settings.payment, PaymentOutcome::Cancelled);
    }

    #[test]
    fn unknown_choices_are_startup_errors() {
        let error = settings_from(&[(PAYMENT_ENV_VAR, "maybe")]).expect_err("invalid payment");
        assert_eq!(
            error.to_string(),
            "invalid HUNT_PAYMENT='maybe' (expected approve|decline|cancel)"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn local_backend_numbers_generations_from_the_cache() {
        let settings = settings_from(&[(BACKEND_ENV_VAR, "local")]).expect("settings");
        let session = build_session(&settings).expect("session");
        session.mount().await;

        let first = session.buzz().await.expect("first generation");
        let second = session.buzz().await.expect("second generation");

        assert_eq!(first.area.generation_number, 1);
        assert_eq!(second.area.generation_number, 2);
    }

    #[test]
    fn missing_config_file_fails_startup() {
        let settings = AppSettings {
            config_path: Some(PathBuf::from("/nonexistent/hunt/config.json")),
            ..settings_from(&[]).expect("settings")
        };
        assert!(matches!(
            build_session(&settings),
            Err(StartupError::Config(ConfigError::Read { .. }))
        ));
    }
}
