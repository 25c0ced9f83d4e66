#[tokio::main]
async fn main() {
    std::process::exit(workline::app::startup::startup().await);
}
