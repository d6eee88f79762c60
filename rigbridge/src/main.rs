//! rigbridge binary: `rig`, `check` and `serve`.

fn main() {
    if let Err(e) = rigbridge::run_cli() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
