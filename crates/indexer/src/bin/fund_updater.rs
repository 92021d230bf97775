use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    indexer::start_fund_updater(std::env::args()).await
}
