mod cli;
mod infra;
mod routes;
mod server;

use repquest::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
