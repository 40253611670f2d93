//! Raw REPL constants and the device-side code templates mpsync sends.

// Control bytes
pub const CTRL_A: u8 = 0x01; // enter raw REPL
pub const CTRL_B: u8 = 0x02; // leave raw REPL
pub const CTRL_C: u8 = 0x03; // interrupt
pub const CTRL_D: u8 = 0x04; // submit / end-of-output marker

/// Printed by the device once raw mode is active; a `>` prompt follows
pub const RAW_REPL_BANNER: &[u8] = b"raw REPL; CTRL-B to exit\r\n";

/// Raw REPL prompt, sent whenever the device is ready for a code block
pub const RAW_PROMPT: &[u8] = b">";

/// Acknowledgement of a submitted code block
pub const EXEC_ACK: &[u8] = b"OK";

/// Bytes per `write()` call when streaming a file to the device.
/// Small enough to stay under the default UART receive buffer.
pub const PUT_CHUNK_SIZE: usize = 256;

pub mod defaults {
    pub const BAUD: u32 = 115_200;
    pub const TIMEOUT_SECS: u64 = 10;
    pub const REMOTE_ROOT: &str = "/";
    pub const OPTIONS_FILE: &str = "mpsync.toml";
}

/// Quote `s` as a single-quoted Python string literal.
pub fn py_str_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Encode bytes as a Python bytes literal using only `\xNN` escapes.
pub fn py_bytes_literal(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 4 + 3);
    out.push_str("b'");
    for b in data {
        out.push_str(&format!("\\x{:02x}", b));
    }
    out.push('\'');
    out
}

pub fn stat_code(path: &str) -> String {
    format!("import uos\nprint(uos.stat({}))", py_str_literal(path))
}

pub fn chdir_code(path: &str) -> String {
    format!("import uos\nuos.chdir({})", py_str_literal(path))
}

pub fn mkdir_code(path: &str) -> String {
    format!("import uos\nuos.mkdir({})", py_str_literal(path))
}

pub const GETCWD_CODE: &str = "import uos\nprint(uos.getcwd())";

/// Prints the cursor's directory as a listing table.
pub const LIST_CODE: &str = "import uos
_c = uos.getcwd()
print()
print(\"Remote files in '%s':\" % _c)
print()
if _c != '/':
    print(' <dir> ..')
for _e in uos.ilistdir():
    print((' <dir> ' if _e[1] & 0x4000 else '       ') + _e[0])
print()
";

pub fn open_write_code(remote: &str) -> String {
    format!("_f = open({}, 'wb')\n_w = _f.write", py_str_literal(remote))
}

pub fn write_chunk_code(chunk: &[u8]) -> String {
    format!("_w({})", py_bytes_literal(chunk))
}

pub const CLOSE_WRITE_CODE: &str = "_f.close()\ndel _f, _w";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn str_literal_escapes_quotes_and_backslashes() {
        assert_eq!(py_str_literal("/lib/app.py"), "'/lib/app.py'");
        assert_eq!(py_str_literal("it's"), "'it\\'s'");
        assert_eq!(py_str_literal("a\\b"), "'a\\\\b'");
        assert_eq!(py_str_literal("x\ny"), "'x\\ny'");
        assert_eq!(py_str_literal("\u{1}"), "'\\x01'");
    }

    #[test]
    fn bytes_literal_is_hex_escaped() {
        assert_eq!(py_bytes_literal(b""), "b''");
        assert_eq!(py_bytes_literal(b"A'\n"), "b'\\x41\\x27\\x0a'");
    }

    #[test]
    fn stat_code_quotes_path() {
        assert_eq!(stat_code("/a b.py"), "import uos\nprint(uos.stat('/a b.py'))");
    }
}
