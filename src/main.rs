fn main() {
    if let Err(err) = redshift_upload::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
