use gauntlet_api::router::ApiDoc;
use utoipa::OpenApi;

/// Dumps the OpenAPI specification, to a file when a path is given and to
/// stdout otherwise.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let spec_json = ApiDoc::openapi().to_pretty_json()?;
    match std::env::args().nth(1) {
        Some(path) => std::fs::write(path, spec_json)?,
        None => println!("{spec_json}"),
    }
    Ok(())
}
