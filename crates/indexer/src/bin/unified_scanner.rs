use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    indexer::start_scanner(std::env::args()).await
}
