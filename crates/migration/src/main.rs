use config::Config;
use sea_orm_migration::prelude::*;
use std::env;

#[tokio::main]
async fn main() {
    // DATABASE_URL from the environment wins; otherwise reuse the server's config.yaml
    if env::var("DATABASE_URL").is_err() {
        match Config::builder()
            .add_source(config::File::with_name("config.yaml").required(false))
            .build()
        {
            Ok(settings) => {
                if let Ok(url) = settings.get_string("database_url") {
                    env::set_var("DATABASE_URL", url);
                }
            }
            Err(e) => eprintln!("Ignoring unreadable config.yaml: {e}"),
        }
    }
    cli::run_cli(migration::Migrator).await;
}
