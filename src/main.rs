use anyhow::Result;

fn main() -> Result<()> {
    sct_batch::cli::run()
}
