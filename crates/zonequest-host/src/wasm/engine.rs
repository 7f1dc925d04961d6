use anyhow::{Context, Result};
use wasmtime::{Config, Engine};

/// Create a configured Wasmtime engine for module execution
///
/// With `fuel` enabled every store must be given fuel before guest code runs.
pub fn create_engine(fuel: bool) -> Result<Engine> {
    let mut config = Config::new();

    // Guest calls run synchronously on the dispatching thread
    config.async_support(false);
    config.consume_fuel(fuel);

    #[cfg(not(debug_assertions))]
    {
        config.cranelift_opt_level(wasmtime::OptLevel::Speed);
    }

    Engine::new(&config).context("Failed to create Wasmtime engine")
}
