fn main() {
    if let Err(e) = actor_migration::run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
