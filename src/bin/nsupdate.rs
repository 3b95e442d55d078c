use anyhow::Result;

fn main() -> Result<()> {
    nsupdate::cli::run()
}
