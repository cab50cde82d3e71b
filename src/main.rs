use tracing_subscriber::EnvFilter;

use idcenter::StorageConfig;

const USAGE: &str = "usage: idcenter <build <group> <start> <step> | get <group> | propel <group> | metrics>";

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("idcenter=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = StorageConfig::from_env();
    tracing::info!(
        name = %config.name,
        db_path = %config.db_path.display(),
        "idcenter starting..."
    );

    let allocator = idcenter::global(&config);

    let output = match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["build", group, start, step] => {
            let built = allocator.build_info(group, start.parse()?, step.parse()?)?;
            serde_json::json!({ "group": group, "built": built })
        }
        ["get", group] => serde_json::to_value(allocator.get(group)?)?,
        ["propel", group] => serde_json::to_value(allocator.propel(group)?)?,
        ["metrics"] => serde_json::to_value(allocator.metrics().snapshot())?,
        _ => return Err(USAGE.into()),
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
