fn main() {
    if let Err(err) = charge_visit_engine::app::run() {
        eprintln!("application startup failed: {err}");
        std::process::exit(1);
    }
}
