use clickhouse_http::{ClickHouseClient, QueryOptions, RecordEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let ch = ClickHouseClient::from_env()?;

    println!("ping: {:?}", ch.pinging().await?);

    let mut stream = ch.query(
        "SELECT number, toString(number * 2) AS doubled FROM system.numbers LIMIT 5",
        QueryOptions::new(),
    )?;

    while let Some(event) = stream.next_event().await {
        match event? {
            RecordEvent::Metadata(columns) => {
                for column in columns {
                    println!("column {} {}", column.name, column.kind);
                }
            }
            RecordEvent::Row(row) => println!("{row}"),
            RecordEvent::Trailer(trailer) => {
                println!("rows={:?} bytes={}", trailer.rows(), trailer.transferred)
            }
            RecordEvent::Progress(progress) => println!("progress: {progress}"),
            RecordEvent::Text(text) => print!("{text}"),
        }
    }

    let outcome = ch
        .querying(
            "SELECT name FROM system.databases",
            QueryOptions::new().data_objects(),
        )
        .await?;
    if let Some(result) = outcome.as_rows() {
        for row in &result.data {
            println!("{}", row["name"]);
        }
    }

    Ok(())
}
