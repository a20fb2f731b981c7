const ENV_FILTER: &str = "I2C_SIM_TRACE";

pub fn setup_tracing() {
    use tracing_subscriber::{filter::LevelFilter, prelude::*, EnvFilter};

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var(ENV_FILTER)
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_names(true)
                .with_filter(filter),
        )
        .init();
}
