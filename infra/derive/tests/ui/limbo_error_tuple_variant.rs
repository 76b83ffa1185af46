use limbo_derive::limbo_error;

#[limbo_error]
pub enum DemoError {
    Io(std::io::Error),
}

fn main() {}
