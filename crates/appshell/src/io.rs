use std::{
    cell::RefCell,
    io::{self, Read, Write},
    rc::Rc,
};

/// A stdout/stderr stand-in whose target can be swapped while script code
/// holds on to the proxy.
///
/// Host functions (the auto-print function, `fmt.print*`) capture a clone of
/// the proxy when the module table is built; the kernel then redirects the
/// shared target to the caller's writer for each evaluation. Writes are
/// forwarded unbuffered.
#[derive(Clone)]
pub struct WriterProxy {
    target: Rc<RefCell<Box<dyn Write>>>,
}

impl Default for WriterProxy {
    fn default() -> Self {
        Self::new(Box::new(io::sink()))
    }
}

impl WriterProxy {
    #[must_use]
    pub fn new(target: Box<dyn Write>) -> Self {
        Self {
            target: Rc::new(RefCell::new(target)),
        }
    }

    /// Installs a new target and returns the previous one.
    pub fn replace(&self, target: Box<dyn Write>) -> Box<dyn Write> {
        std::mem::replace(&mut *self.target.borrow_mut(), target)
    }
}

impl Write for WriterProxy {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.target.borrow_mut().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.target.borrow_mut().flush()
    }
}

/// Stdin counterpart of [`WriterProxy`]; reports end of stream by default.
#[derive(Clone)]
pub struct ReaderProxy {
    target: Rc<RefCell<Box<dyn Read>>>,
}

impl Default for ReaderProxy {
    fn default() -> Self {
        Self::new(Box::new(io::empty()))
    }
}

impl ReaderProxy {
    #[must_use]
    pub fn new(target: Box<dyn Read>) -> Self {
        Self {
            target: Rc::new(RefCell::new(target)),
        }
    }

    /// Installs a new target and returns the previous one.
    pub fn replace(&self, target: Box<dyn Read>) -> Box<dyn Read> {
        std::mem::replace(&mut *self.target.borrow_mut(), target)
    }
}

impl Read for ReaderProxy {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.target.borrow_mut().read(buf)
    }
}

/// A writer that collects everything written into a shared buffer.
///
/// Clones share the buffer: hand one clone to `Shell::eval` and read the
/// output from another.
#[derive(Debug, Clone, Default)]
pub struct CollectOutput(Rc<RefCell<Vec<u8>>>);

impl CollectOutput {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the collected output, replacing invalid UTF-8.
    #[must_use]
    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }

    /// Returns the collected output and clears the buffer.
    pub fn take(&self) -> String {
        let bytes = std::mem::take(&mut *self.0.borrow_mut());
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Write for CollectOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_proxy_forwards_to_current_target() {
        let first = CollectOutput::new();
        let second = CollectOutput::new();
        let mut proxy = WriterProxy::default();
        proxy.write_all(b"dropped").unwrap();

        proxy.replace(Box::new(first.clone()));
        proxy.write_all(b"one").unwrap();
        proxy.replace(Box::new(second.clone()));
        proxy.write_all(b"two").unwrap();

        assert_eq!(first.output(), "one");
        assert_eq!(second.output(), "two");
    }

    #[test]
    fn reader_proxy_defaults_to_eof() {
        let mut proxy = ReaderProxy::default();
        let mut buf = String::new();
        assert_eq!(proxy.read_to_string(&mut buf).unwrap(), 0);

        proxy.replace(Box::new(io::Cursor::new(b"input".to_vec())));
        proxy.read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "input");
    }
}
