fn main() {
    if let Err(e) = tunematch_lib::run() {
        log::error!("{:#}", e);
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
