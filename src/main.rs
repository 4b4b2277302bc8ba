use dotenvy::dotenv;
use rocket::{Build, Rocket};

#[rocket::launch]
fn rocket() -> Rocket<Build> {
    dotenv().ok();
    env_logger::init();

    doit_marketplace::build()
}
