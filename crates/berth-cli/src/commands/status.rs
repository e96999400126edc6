use berth_engine::EngineClient;

pub async fn status(container: &str, json: bool) -> anyhow::Result<()> {
    let client = EngineClient::new();
    let state = client.inspect_state(container).await?;

    if json {
        let report = serde_json::json!({ "container": container, "process": state });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{container}: {state}");
    }
    Ok(())
}
