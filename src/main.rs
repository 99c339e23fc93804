fn main() -> Result<(), Box<dyn std::error::Error>> {
    passfill_lib::cli::run()
}
