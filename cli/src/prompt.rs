use sectorscan_core::{Result, SectorScanError};
use std::io::{BufRead, Write};

fn ask<R: BufRead, W: Write>(input: &mut R, output: &mut W, question: &str) -> Result<String> {
    write!(output, "{}", question)?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Ask for a physical disk sector number in decimal.
pub fn read_sector<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> Result<u64> {
    let answer = ask(input, output, "Enter disk sector to query: ")?;
    answer.parse().map_err(|_| {
        SectorScanError::InvalidInput(format!("'{}' is not a valid sector number", answer))
    })
}

/// Yes/no question; anything starting with `y` or `Y` is a yes.
pub fn confirm<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    question: &str,
) -> Result<bool> {
    let answer = ask(input, output, question)?;
    Ok(answer.to_ascii_uppercase().starts_with('Y'))
}
