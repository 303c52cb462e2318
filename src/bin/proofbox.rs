use anyhow::Result;

fn main() -> Result<()> {
    proofbox::cli::run()
}
