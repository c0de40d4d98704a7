use std::process::ExitCode;

fn main() -> ExitCode {
    tech_week_scrape_lib::run()
}
