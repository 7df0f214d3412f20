use clickhouse_http::{ClickHouseClient, QueryOptions, Record};
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let ch = ClickHouseClient::from_env()?;

    ch.querying(
        "CREATE TABLE IF NOT EXISTS demo_events (id UInt32, name String) ENGINE = Memory",
        QueryOptions::new(),
    )
    .await?;

    let mut insert = ch.query("INSERT INTO demo_events", QueryOptions::new())?;
    insert.write(json!([1, "signup"])).await?;
    insert.write(json!({"id": 2, "name": "login"})).await?;
    insert.write(Record::text("3\tlogout")).await?;
    insert.collect().await?;

    let mut insert = ch.query(
        "INSERT INTO demo_events FORMAT JSONEachRow",
        QueryOptions::new(),
    )?;
    insert.write(json!({"id": 4, "name": "purchase"})).await?;
    insert.collect().await?;

    let outcome = ch
        .querying(
            "SELECT count() AS total FROM demo_events",
            QueryOptions::new().data_objects(),
        )
        .await?;
    println!("{outcome:?}");

    Ok(())
}
