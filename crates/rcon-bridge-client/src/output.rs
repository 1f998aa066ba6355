//! Where the client puts what the operator should see

/// Operator-facing output of a [`crate::BridgeClient`]
pub trait OperatorOutput: Send + Sync + 'static {
    /// A LOG line received from the bridge server, shown verbatim
    fn print_line(&self, line: &str);

    /// A connection notice from the client itself
    fn notice(&self, message: &str);
}

/// Log lines to stdout, notices to stderr
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleOutput;

impl OperatorOutput for ConsoleOutput {
    fn print_line(&self, line: &str) {
        println!("{}", line);
    }

    fn notice(&self, message: &str) {
        eprintln!("[Bridge] {}", message);
    }
}
