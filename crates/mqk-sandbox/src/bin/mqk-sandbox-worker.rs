//! Standalone sandbox worker. Same behavior as `mqk sandbox-worker`.

fn main() {
    std::process::exit(mqk_sandbox::worker_main());
}
