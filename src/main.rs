fn main() -> anyhow::Result<()> {
    cyberpet_lib::run()
}
