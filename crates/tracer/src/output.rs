//! Line-oriented output sinks for trace events.
//!
//! Selected by the `output` config key: empty → stdout, `http://host:port` →
//! a small HTTP server holding the accumulated page, anything else → a file
//! path. The FFI layer and tests use the callback sink.

use std::{
    cell::RefCell,
    fs::File,
    io::Write,
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
    thread,
};

use axum::{Router, extract::State, response::Html, routing::get};
use tracing::{error, info};

use crate::errors::TracerError;

pub enum OutputWriter {
    Stdout,
    File(RefCell<File>),
    Http(HttpWriter),
    Callback(RefCell<Box<dyn FnMut(&str)>>),
}

impl std::fmt::Debug for OutputWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputWriter::Stdout => f.write_str("OutputWriter::Stdout"),
            OutputWriter::File(_) => f.write_str("OutputWriter::File"),
            OutputWriter::Http(_) => f.write_str("OutputWriter::Http"),
            OutputWriter::Callback(_) => f.write_str("OutputWriter::Callback"),
        }
    }
}

impl OutputWriter {
    /// Build a writer from the `output` config value.
    pub fn from_config(output: &str) -> Result<Self, TracerError> {
        if output.is_empty() {
            Ok(OutputWriter::Stdout)
        } else if let Some(addr) = output.strip_prefix("http://") {
            Ok(OutputWriter::Http(HttpWriter::spawn(addr)?))
        } else {
            let file = File::create(output)?;
            Ok(OutputWriter::File(RefCell::new(file)))
        }
    }

    pub fn callback(f: impl FnMut(&str) + 'static) -> Self {
        OutputWriter::Callback(RefCell::new(Box::new(f)))
    }

    pub fn print(&self, text: &str) {
        match self {
            OutputWriter::Stdout => {
                print!("{text}");
            }
            OutputWriter::File(file) => {
                if let Err(e) = file.borrow_mut().write_all(text.as_bytes()) {
                    error!("output write failed: {e}");
                }
            }
            OutputWriter::Http(http) => http.append(text),
            OutputWriter::Callback(cb) => (cb.borrow_mut())(text),
        }
    }

    pub fn println(&self, text: &str) {
        self.print(text);
        self.print("\n");
    }
}

/// Background HTTP server exposing the accumulated trace output.
///
/// `/` renders the page, `/file` serves the raw text, `/clear` resets it.
pub struct HttpWriter {
    page: Arc<Mutex<String>>,
}

impl HttpWriter {
    fn spawn(addr: &str) -> Result<Self, TracerError> {
        let socket_addr: SocketAddr = addr
            .parse()
            .map_err(|_| TracerError::Config(format!("invalid http output address: {addr}")))?;
        let page = Arc::new(Mutex::new(String::new()));
        let served = page.clone();

        thread::Builder::new()
            .name("provex-http-output".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_io()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        error!("http output runtime failed: {e}");
                        return;
                    }
                };
                runtime.block_on(async move {
                    let app = Router::new()
                        .route("/", get(page_handler))
                        .route("/file", get(file_handler))
                        .route("/clear", get(clear_handler))
                        .with_state(served);
                    let listener = match tokio::net::TcpListener::bind(socket_addr).await {
                        Ok(l) => l,
                        Err(e) => {
                            error!("http output bind {socket_addr} failed: {e}");
                            return;
                        }
                    };
                    info!("serving trace output on http://{socket_addr}");
                    if let Err(e) = axum::serve(listener, app).await {
                        error!("http output server failed: {e}");
                    }
                });
            })?;

        Ok(Self { page })
    }

    fn append(&self, text: &str) {
        self.page
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_str(text);
    }
}

async fn page_handler(State(page): State<Arc<Mutex<String>>>) -> Html<String> {
    let body = page.lock().unwrap_or_else(PoisonError::into_inner).clone();
    Html(format!("<pre>{body}</pre>"))
}

async fn file_handler(State(page): State<Arc<Mutex<String>>>) -> String {
    page.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

async fn clear_handler(State(page): State<Arc<Mutex<String>>>) -> &'static str {
    page.lock().unwrap_or_else(PoisonError::into_inner).clear();
    "cleared\n"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn callback_collects_lines() {
        let collected = Rc::new(RefCell::new(String::new()));
        let sink = collected.clone();
        let writer = OutputWriter::callback(move |s| sink.borrow_mut().push_str(s));

        writer.println("hello");
        writer.print("wor");
        writer.println("ld");

        assert_eq!(&*collected.borrow(), "hello\nworld\n");
    }
}
