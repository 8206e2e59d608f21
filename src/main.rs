use k8s_image_resolver::cli::{Args, Runner};
use k8s_image_resolver::logging::Logger;

#[tokio::main]
async fn main() {
    let args = Args::parse_args();

    let runner = match Runner::new(args) {
        Ok(runner) => runner,
        Err(e) => {
            Logger::new(false).error(&e.to_string());
            std::process::exit(1);
        }
    };

    if let Err(e) = runner.run().await {
        runner.logger().error(&e.to_string());
        std::process::exit(1);
    }
}
