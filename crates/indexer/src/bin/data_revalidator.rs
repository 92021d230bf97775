use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    indexer::start_revalidator(std::env::args()).await
}
