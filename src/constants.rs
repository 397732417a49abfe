//! # Constants
//!
//! Shared constants used throughout the operator.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Field manager used for every server-side apply issued by the operator
pub const FIELD_MANAGER: &str = "taskcluster.wellplayed.games";

/// Annotation on the parent resource recording which child kinds were deployed
pub const COMPOSITE_STATE_ANNOTATION: &str = "hive.wellplayed.games/composite-state";

/// Label binding each child resource to the UID of its parent
pub const COMPOSITE_PARENT_LABEL: &str = "hive.wellplayed.games/composite-parent";

/// Annotation disabling the hive sidecar on job pod templates
pub const HIVE_ENABLED_ANNOTATION: &str = "hive.wellplayed.games/enabled";

/// Annotation on the database upgrade Job holding the hash of its inputs
pub const UPGRADE_HASH_ANNOTATION: &str = "taskcluster.wellplayed.games/hash";

/// Key inside the state Secret holding the persisted credential document
pub const STATE_SECRET_KEY: &str = "state";

/// Suffix appended to the instance name to form the state Secret name
pub const STATE_SECRET_SUFFIX: &str = "-state";

/// Default docker repository for Taskcluster services
pub const DEFAULT_DOCKER_REPOSITORY: &str = "taskcluster/taskcluster";

/// Default Taskcluster version used when the image carries no tag
pub const DEFAULT_TASKCLUSTER_VERSION: &str = "42.1.1";

/// Prefix of every generated service access token
pub const ACCESS_TOKEN_PREFIX: &str = "TC";

/// Number of random characters following the access token prefix
pub const ACCESS_TOKEN_RANDOM_LENGTH: usize = 22;

/// Length of generated database and broker passwords
pub const PASSWORD_LENGTH: usize = 20;

/// Length of the generated web-server session secret
pub const SESSION_SECRET_LENGTH: usize = 20;

/// Number of random characters encoded into each generated crypto key
pub const CRYPTO_KEY_LENGTH: usize = 32;

/// Algorithm recorded on generated and migrated crypto keys
pub const CRYPTO_KEY_ALGORITHM: &str = "aes-256";

/// Length of tokens generated for `AccessToken` resources
pub const ACCESS_TOKEN_RESOURCE_TOKEN_LENGTH: usize = 30;

/// Default admin username for the message broker management API
pub const DEFAULT_BROKER_ADMIN_USERNAME: &str = "guest";

/// Default admin password for the message broker management API
pub const DEFAULT_BROKER_ADMIN_PASSWORD: &str = "guest";

/// Admin username used for Cloud SQL instances
pub const DATABASE_ADMIN_USERNAME: &str = "postgres";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default timeout for establishing the admin database connection (seconds)
pub const DEFAULT_DATABASE_TIMEOUT_SECS: u64 = 30;

/// Default timeout for each broker management API call (seconds)
pub const DEFAULT_BROKER_TIMEOUT_SECS: u64 = 30;

/// Default requeue interval for reconciliation errors (seconds)
/// Used only when per-resource backoff state is unavailable
pub const DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS: u64 = 60;

/// Default interval between successful reconciliations (seconds)
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 600;

/// Delay before restarting the watch stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Requeue interval while the database upgrade Job is running (seconds)
pub const UPGRADE_JOB_POLL_SECS: u64 = 60;

/// Default chart location inside the operator image
pub const DEFAULT_CHART_PATH: &str = "/charts/taskcluster";

/// Fibonacci backoff bounds for failed reconciliations (minutes)
pub const BACKOFF_MIN_MINUTES: u64 = 1;
pub const BACKOFF_MAX_MINUTES: u64 = 10;
