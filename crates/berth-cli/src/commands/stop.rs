use berth_engine::EngineClient;

pub async fn stop(container: &str) -> anyhow::Result<()> {
    let client = EngineClient::new();

    println!("Stopping {container}...");
    client.stop_container(container).await?;

    // Containers started without --detach are removed on exit
    match client.inspect_state(container).await {
        Ok(state) => println!("{container}: {state}"),
        Err(e) => {
            tracing::debug!(error = %e, "container gone after stop");
            println!("{container}: stopped (removed)");
        }
    }
    Ok(())
}
