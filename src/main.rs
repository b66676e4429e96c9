#[actix_web::main]
async fn main() -> std::io::Result<()> {
    data_explorer_lib::run().await
}
