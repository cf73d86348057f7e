//! roomwatch: a multi-platform live-stream recording supervisor.

mod app;
mod cli;
mod launcher;

#[tokio::main]
async fn main() {
    let args = cli::args().run();
    let exit_code = app::run(args).await;
    std::process::exit(exit_code as i32);
}
