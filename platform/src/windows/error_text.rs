use std::ptr::{null, null_mut};
use winapi::shared::minwindef::DWORD;
use winapi::um::winbase::{FormatMessageW, FORMAT_MESSAGE_FROM_SYSTEM};

/// Message buffer size in UTF-16 units
const MESSAGE_CAPACITY: usize = 256;

/// System description text for an OS status code.
///
/// Falls back to a generic text when the system has no message for `code`
/// or the message does not fit in the buffer.
pub fn describe_status(code: u32) -> String {
    let mut buffer = [0u16; MESSAGE_CAPACITY];
    let len = unsafe {
        FormatMessageW(
            FORMAT_MESSAGE_FROM_SYSTEM,
            null(),
            code,
            0,
            buffer.as_mut_ptr(),
            buffer.len() as DWORD,
            null_mut(),
        )
    };

    if len == 0 {
        return format!("Unknown error {}", code);
    }
    String::from_utf16_lossy(&buffer[..len as usize])
        .trim_end()
        .to_string()
}
