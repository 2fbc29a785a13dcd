fn main() -> anyhow::Result<()> {
    tabshelf_lib::run()
}
