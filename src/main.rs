use miette::Result;
use regauth::Regauth;

#[async_std::main]
async fn main() -> Result<()> {
    Regauth::load().await
}
