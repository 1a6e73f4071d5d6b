use signal_core::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::builder().format_module_path(false).init();

    let config = Config::load();
    if let Err(e) = signal_core::server_main(config).await {
        log::error!("server exited: {e}");
        std::process::exit(1);
    }

    Ok(())
}
