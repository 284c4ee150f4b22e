mod alarm;
mod encoder;
mod host;
mod logging;
mod notify;
mod pins;
mod plug;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run()
        .await
        .inspect_err(|err| tracing::error!("{err:#}"))
}
