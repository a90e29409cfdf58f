fn main() {
    if let Err(err) = livetrack_lib::run() {
        eprintln!("livetrack failed: {err:#}");
        std::process::exit(1);
    }
}
