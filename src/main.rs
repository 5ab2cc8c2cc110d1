fn main() -> anyhow::Result<()> {
    hippolock::cli::run()
}
