#[tokio::main]
async fn main() {
    if let Err(e) = appstudio_lib::run().await {
        eprintln!("appstudio: {e}");
        std::process::exit(1);
    }
}
