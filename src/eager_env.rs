use std::env;
use std::sync::LazyLock;

macro_rules! env_fallback {
    ($env_name:expr, $type:ty) => {
        panic!("Missing required environment variable: {}", $env_name)
    };
    ($env_name:expr, $type:ty, $default:expr) => {
        $default
    };
}

macro_rules! define_env_vars {
    ($(($name:ident, $env_name:expr, $type:ty $(, $default:expr)?)),* $(,)?) => {
        $(
            pub static $name: LazyLock<$type> = LazyLock::new(|| {
                match env::var($env_name) {
                    Ok(val) => val.parse::<$type>().unwrap_or_else(|_| {
                        panic!(
                            "Failed to parse environment variable {} with value '{}' as {}",
                            $env_name,
                            val,
                            stringify!($type)
                        )
                    }),
                    Err(_) => env_fallback!($env_name, $type $(, $default)?),
                }
            });
        )*

        /// Force initialization of all environment variables at startup
        /// Call this early in main() to fail fast if any env vars are missing
        pub fn check_env() {
            $(
                let _ = *$name;
            )*
        }
    };
}

// Variables without a default are required
define_env_vars!(
    (PORT, "PORT", u16),
    (NODE_ADDRESS, "NODE_ADDRESS", String),
    (CACHE_NODES, "CACHE_NODES", String),
    (CACHE_INTERNAL_TOKEN, "CACHE_INTERNAL_TOKEN", String),
    (DEFAULT_TTL_SECONDS, "DEFAULT_TTL_SECONDS", u64, 3600),
    (
        HEALTH_CHECK_INTERVAL_SECONDS,
        "HEALTH_CHECK_INTERVAL_SECONDS",
        u64,
        10
    ),
    (PROBE_TIMEOUT_MILLIS, "PROBE_TIMEOUT_MILLIS", u64, 1000),
    (REQUEST_TIMEOUT_MILLIS, "REQUEST_TIMEOUT_MILLIS", u64, 2000),
    (
        FAILED_NODE_EVICTION_SECONDS,
        "FAILED_NODE_EVICTION_SECONDS",
        u64,
        300
    ),
    (MAX_RETRIES, "MAX_RETRIES", u32, 3),
    (
        VIRTUAL_NODES_PER_WEIGHT_UNIT,
        "VIRTUAL_NODES_PER_WEIGHT_UNIT",
        u32,
        150
    ),
    (REPLICATION_WORKERS, "REPLICATION_WORKERS", usize, 16),
    (
        REPLICATION_TIMEOUT_MILLIS,
        "REPLICATION_TIMEOUT_MILLIS",
        u64,
        5000
    ),
    (SHUTDOWN_GRACE_SECONDS, "SHUTDOWN_GRACE_SECONDS", u64, 5),
);
