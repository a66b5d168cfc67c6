mod cli;
mod demo;
mod infra;
mod routes;
mod server;
mod sweeper;

use athlete_vote::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
