fn main() {
    if let Err(err) = csv_integrator::run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
