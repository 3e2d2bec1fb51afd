mod application;
mod presentation;

use splitter_core::error::Result;

fn main() -> Result<()> {
    application::run()
}
