//! The simulation log sink.
//!
//! Every observable event in a simulation (sends, broadcasts, receives, node
//! starts, message handling, protocol decisions) is reported through a
//! [`Logger`]. The default is [`NullLogger`]; demos typically use
//! [`PrintLogger`] for a human-readable table or [`JsonLogger`] for
//! line-oriented machine-readable output.

use std::cell::RefCell;
use std::io::{self, Write};

use serde_json::json;

/// Sink for simulation events.
pub trait Logger {
    /// Called once when a network is constructed.
    fn header(&self) {}

    /// Reports one event. `now` is the virtual time, `ident` the node the
    /// event concerns, `event` a short tag such as `"send"` or `"handle"`,
    /// and `detail` free-form text.
    fn log(&self, now: u64, ident: usize, event: &str, detail: &str);
}

/// A logger that swallows everything. This is the default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn log(&self, _now: u64, _ident: usize, _event: &str, _detail: &str) {}
}

/// Prints an aligned table to a writer, stdout by default.
pub struct PrintLogger {
    out: RefCell<Box<dyn Write>>,
}

impl PrintLogger {
    #[must_use]
    pub fn new(out: Box<dyn Write>) -> Self {
        Self {
            out: RefCell::new(out),
        }
    }

    #[must_use]
    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }
}

impl Logger for PrintLogger {
    fn header(&self) {
        let mut out = self.out.borrow_mut();
        let _ = writeln!(out);
        let _ = writeln!(out, " Time | Node | Event      | Detail");
    }

    fn log(&self, now: u64, ident: usize, event: &str, detail: &str) {
        let mut out = self.out.borrow_mut();
        let _ = writeln!(out, "{now:5} | {ident:4} | {event:10} | {detail}");
    }
}

/// Emits one JSON object per event, one per line.
pub struct JsonLogger {
    out: RefCell<Box<dyn Write>>,
}

impl JsonLogger {
    #[must_use]
    pub fn new(out: Box<dyn Write>) -> Self {
        Self {
            out: RefCell::new(out),
        }
    }

    #[must_use]
    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }
}

impl Logger for JsonLogger {
    fn log(&self, now: u64, ident: usize, event: &str, detail: &str) {
        let record = json!({
            "time": now,
            "node": ident,
            "event": event,
            "detail": detail,
        });
        let mut out = self.out.borrow_mut();
        let _ = writeln!(out, "{record}");
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuf(Rc<RefCell<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.borrow().clone()).unwrap()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_print_logger_format() {
        let buf = SharedBuf::default();
        let logger = PrintLogger::new(Box::new(buf.clone()));

        logger.header();
        logger.log(7, 2, "send", "to 0 delay 1: ping");

        let output = buf.contents();
        assert!(output.contains(" Time | Node | Event      | Detail"));
        assert!(output.contains("    7 |    2 | send       | to 0 delay 1: ping"));
    }

    #[test]
    fn test_json_logger_emits_parseable_lines() {
        let buf = SharedBuf::default();
        let logger = JsonLogger::new(Box::new(buf.clone()));

        logger.header();
        logger.log(3, 1, "receive", "from 0 delay 1: pong");

        let output = buf.contents();
        let record: serde_json::Value = serde_json::from_str(output.trim()).unwrap();
        assert_eq!(record["time"], 3);
        assert_eq!(record["node"], 1);
        assert_eq!(record["event"], "receive");
    }

    #[test]
    fn test_null_logger_is_silent() {
        // Nothing observable; this just exercises the default header.
        let logger = NullLogger;
        logger.header();
        logger.log(0, 0, "start", "node");
    }
}
