//! Tankwatch daemon binary. See [`tankwatchd::cli`] for usage.

fn main() -> anyhow::Result<()> {
    tankwatchd::cli::main()
}
