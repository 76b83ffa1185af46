use limbo_derive::limbo_error;
use std::borrow::Cow;

#[limbo_error]
pub enum DemoError {
    #[error("IO error{}: {source}", format_context(.context))]
    Io {
        #[source]
        source: std::io::Error,
        context: Option<Cow<'static, str>>,
    },

    #[error("Name rejected: {name}")]
    Rejected { name: String },

    #[error("Internal error{}: {message}", format_context(.context))]
    Internal { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}

fn open_missing() -> Result<std::fs::File> {
    std::fs::File::open("/definitely/not/here").context("Opening demo file")
}

fn main() {
    match open_missing() {
        Err(DemoError::Io { context: Some(context), .. }) => assert_eq!(context, "Opening demo file"),
        other => panic!("unexpected result: {other:?}"),
    }

    let err: DemoError = "boom".into();
    assert_eq!(err.to_string(), "Internal error: boom");

    let err: DemoError = Err::<(), _>(DemoError::from(String::from("late")))
        .context("while testing")
        .unwrap_err();
    assert_eq!(err.to_string(), "Internal error (while testing): late");

    let rejected = DemoError::Rejected { name: "CON".to_owned() };
    assert_eq!(rejected.to_string(), "Name rejected: CON");
}
