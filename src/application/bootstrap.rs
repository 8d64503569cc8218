use crate::application::oauth::{OAuthManager, load_oauth_config_from_lookup, optional_lookup_value};
use crate::application::scheduling_service::{SchedulingService, SchedulingSettings};
use crate::domain::models::CalendarProvider;
use crate::infrastructure::availability_repository::SqliteAvailabilityRepository;
use crate::infrastructure::calcom_adapter::CalcomAdapter;
use crate::infrastructure::calcom_client::ReqwestCalcomClient;
use crate::infrastructure::calendar_adapter::ExternalCalendarAdapter;
use crate::infrastructure::config::{ConfigBundle, ensure_default_configs, load_configs};
use crate::infrastructure::credential_store::SqliteCredentialStore;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::google_calendar_adapter::GoogleCalendarAdapter;
use crate::infrastructure::google_calendar_client::ReqwestGoogleCalendarClient;
use crate::infrastructure::logging::init_logging;
use crate::infrastructure::notification::{BroadcastNotificationHub, NotificationDispatcher};
use crate::infrastructure::oauth_client::ReqwestOAuthClient;
use crate::infrastructure::pending_sync_repository::SqlitePendingSyncRepository;
use crate::infrastructure::session_repository::SqliteSessionRepository;
use crate::infrastructure::storage::initialize_database;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const DATABASE_FILE_NAME: &str = "coachsched.sqlite";
const CALCOM_API_KEY_KEYS: &[&str] = &["COACHSCHED_CALCOM_API_KEY", "CALCOM_API_KEY"];

pub type GoogleOAuthManager = OAuthManager<SqliteCredentialStore, ReqwestOAuthClient>;
pub type SqliteSchedulingService = SchedulingService<
    SqliteAvailabilityRepository,
    SqliteSessionRepository,
    SqlitePendingSyncRepository,
>;

#[derive(Debug, Clone)]
pub struct BootstrapResult {
    pub workspace_root: PathBuf,
    pub config_dir: PathBuf,
    pub database_path: PathBuf,
    pub log_path: PathBuf,
}

/// Creates `config/`, `state/` and `logs/` under the root, writes missing
/// default configs, applies the schema and starts JSON logging.
pub fn bootstrap_workspace(workspace_root: &Path) -> Result<BootstrapResult, InfraError> {
    let config_dir = workspace_root.join("config");
    let state_dir = workspace_root.join("state");
    let logs_dir = workspace_root.join("logs");
    let database_path = state_dir.join(DATABASE_FILE_NAME);

    fs::create_dir_all(&config_dir)?;
    fs::create_dir_all(&state_dir)?;
    fs::create_dir_all(&logs_dir)?;

    ensure_default_configs(&config_dir)?;
    initialize_database(&database_path)?;
    let log_path = init_logging(&logs_dir)?;

    tracing::info!(workspace_root = %workspace_root.display(), "workspace ready");
    Ok(BootstrapResult {
        workspace_root: workspace_root.to_path_buf(),
        config_dir,
        database_path,
        log_path,
    })
}

/// A bootstrapped workspace with its service wired to SQLite and the configured calendars.
pub struct Workspace {
    pub paths: BootstrapResult,
    pub config: ConfigBundle,
    pub service: SqliteSchedulingService,
    pub notifications: Arc<BroadcastNotificationHub>,
    /// Present when Google client credentials were found.
    pub google_oauth: Option<Arc<GoogleOAuthManager>>,
    /// Providers that got an adapter, in lookup order.
    pub providers: Vec<CalendarProvider>,
}

pub fn open_workspace<F>(workspace_root: &Path, lookup: F) -> Result<Workspace, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let paths = bootstrap_workspace(workspace_root)?;
    let config = load_configs(&paths.config_dir)?;
    let calendars = build_adapters(&config, &paths.database_path, &lookup)?;
    let notifications = Arc::new(BroadcastNotificationHub::new());

    let service = SchedulingService::new(
        Arc::new(SqliteAvailabilityRepository::new(&paths.database_path)),
        Arc::new(SqliteSessionRepository::new(&paths.database_path)),
        Arc::new(SqlitePendingSyncRepository::new(&paths.database_path)),
        calendars.adapters,
        Arc::clone(&notifications) as Arc<dyn NotificationDispatcher>,
        SchedulingSettings::from(&config),
    );

    Ok(Workspace {
        paths,
        config,
        service,
        notifications,
        google_oauth: calendars.google_oauth,
        providers: calendars.providers,
    })
}

/// Reads secrets from the process environment.
pub fn open_workspace_from_env(workspace_root: &Path) -> Result<Workspace, InfraError> {
    open_workspace(workspace_root, |key| std::env::var(key).ok())
}

struct Calendars {
    adapters: Vec<Arc<dyn ExternalCalendarAdapter>>,
    google_oauth: Option<Arc<GoogleOAuthManager>>,
    providers: Vec<CalendarProvider>,
}

fn build_adapters<F>(
    config: &ConfigBundle,
    database_path: &Path,
    lookup: &F,
) -> Result<Calendars, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let request_timeout = Duration::from_millis(config.scheduling.adapter_timeout_ms);
    let mut calendars = Calendars {
        adapters: Vec::new(),
        google_oauth: None,
        providers: Vec::new(),
    };

    for provider in &config.calendars.providers {
        if calendars.providers.contains(provider) {
            continue;
        }
        match provider {
            CalendarProvider::Google => {
                let oauth_config = match load_oauth_config_from_lookup(lookup) {
                    Ok(oauth_config) => oauth_config,
                    Err(error) => {
                        tracing::warn!(error = %error, "google calendar disabled");
                        continue;
                    }
                };
                let oauth = Arc::new(OAuthManager::new(
                    oauth_config,
                    Arc::new(SqliteCredentialStore::new(database_path, CalendarProvider::Google)),
                    Arc::new(ReqwestOAuthClient::new(request_timeout)?),
                ));
                calendars.adapters.push(Arc::new(GoogleCalendarAdapter::new(
                    Arc::clone(&oauth),
                    Arc::new(ReqwestGoogleCalendarClient::new(request_timeout)?),
                    config.calendars.google.clone(),
                )));
                calendars.google_oauth = Some(oauth);
            }
            CalendarProvider::Calcom => {
                let client = ReqwestCalcomClient::new(&config.calendars.calcom.base_url, request_timeout)?;
                calendars.adapters.push(Arc::new(CalcomAdapter::new(
                    Arc::new(client),
                    config.calendars.calcom.clone(),
                    optional_lookup_value(lookup, CALCOM_API_KEY_KEYS),
                )));
            }
        }
        calendars.providers.push(*provider);
    }

    tracing::info!(providers = ?calendars.providers, "calendar adapters configured");
    Ok(calendars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::CoachId;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    static NEXT_ROOT: AtomicU64 = AtomicU64::new(0);

    struct TempWorkspace {
        path: PathBuf,
    }

    impl TempWorkspace {
        fn new() -> Self {
            let path = std::env::temp_dir().join(format!(
                "coachsched-bootstrap-{}-{}",
                std::process::id(),
                NEXT_ROOT.fetch_add(1, Ordering::Relaxed)
            ));
            Self { path }
        }
    }

    impl Drop for TempWorkspace {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    #[test]
    fn bootstrap_lays_out_workspace_and_is_repeatable() {
        let workspace = TempWorkspace::new();
        let first = bootstrap_workspace(&workspace.path).expect("bootstrap");
        assert!(first.config_dir.join("app.json").exists());
        assert!(first.config_dir.join("calendars.json").exists());
        assert!(first.config_dir.join("scheduling.json").exists());
        assert!(first.database_path.exists());
        assert!(first.log_path.exists());

        let second = bootstrap_workspace(&workspace.path).expect("bootstrap again");
        assert_eq!(first.database_path, second.database_path);
    }

    #[test]
    fn google_is_skipped_without_client_credentials() {
        let workspace = TempWorkspace::new();
        let opened = open_workspace(&workspace.path, |_| None).expect("open");
        assert_eq!(opened.providers, vec![CalendarProvider::Calcom]);
        assert!(opened.google_oauth.is_none());
        assert_eq!(opened.service.settings().slot_granularity_minutes, 60);
    }

    #[test]
    fn google_is_wired_when_credentials_are_present() {
        let workspace = TempWorkspace::new();
        let env: HashMap<&str, &str> = HashMap::from([
            ("COACHSCHED_GOOGLE_CLIENT_ID", "client"),
            ("COACHSCHED_GOOGLE_CLIENT_SECRET", "secret"),
        ]);
        let opened = open_workspace(&workspace.path, |key| env.get(key).map(|value| value.to_string()))
            .expect("open");
        assert_eq!(
            opened.providers,
            vec![CalendarProvider::Google, CalendarProvider::Calcom]
        );
        let oauth = opened.google_oauth.expect("google oauth");
        let url = oauth.build_authorization_url("coach-1").expect("url");
        assert!(url.contains("client_id=client"));
        assert!(opened
            .service
            .list_sessions(&CoachId::from("coach-1"), chrono::NaiveDate::from_ymd_opt(2026, 2, 16).expect("date"))
            .expect("list")
            .is_empty());
    }
}
