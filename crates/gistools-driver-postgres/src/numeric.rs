//! Binary wire format for NUMERIC values
//!
//! The server sends NUMERIC as base-10000 digit groups:
//! `ndigits:i16 weight:i16 sign:u16 dscale:i16` followed by `ndigits` groups.
//! Values cross the driver boundary as decimal text so nothing is rounded.

use bytes::{BufMut, BytesMut};
use std::error::Error;

type BoxError = Box<dyn Error + Sync + Send>;

const SIGN_POSITIVE: u16 = 0x0000;
const SIGN_NEGATIVE: u16 = 0x4000;
const SIGN_NAN: u16 = 0xC000;

/// Decode a binary NUMERIC payload into decimal text
pub(crate) fn decode(raw: &[u8]) -> Result<String, BoxError> {
    if raw.len() < 8 {
        return Err("NUMERIC payload shorter than header".into());
    }
    let ndigits = i16::from_be_bytes([raw[0], raw[1]]);
    let weight = i16::from_be_bytes([raw[2], raw[3]]) as i32;
    let sign = u16::from_be_bytes([raw[4], raw[5]]);
    let dscale = i16::from_be_bytes([raw[6], raw[7]]);
    if ndigits < 0 || dscale < 0 {
        return Err("NUMERIC header has negative counts".into());
    }
    if sign == SIGN_NAN {
        return Ok("NaN".to_string());
    }

    let ndigits = ndigits as usize;
    if raw.len() < 8 + ndigits * 2 {
        return Err("NUMERIC payload truncated".into());
    }
    let groups: Vec<u16> = raw[8..8 + ndigits * 2]
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    let group_at = |position: i32| -> u16 {
        usize::try_from(position)
            .ok()
            .and_then(|i| groups.get(i).copied())
            .unwrap_or(0)
    };

    let mut text = String::new();
    if weight < 0 {
        text.push('0');
    } else {
        for position in 0..=weight {
            if position == 0 {
                text.push_str(&group_at(position).to_string());
            } else {
                text.push_str(&format!("{:04}", group_at(position)));
            }
        }
    }

    let dscale = dscale as usize;
    if dscale > 0 {
        let mut fraction = String::new();
        let mut exponent = 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", group_at(weight + exponent)));
            exponent += 1;
        }
        fraction.truncate(dscale);
        text.push('.');
        text.push_str(&fraction);
    }

    if sign == SIGN_NEGATIVE && text.chars().any(|c| c.is_ascii_digit() && c != '0') {
        text.insert(0, '-');
    }
    Ok(text)
}

/// Encode decimal text (`-12.50`, `3`, `NaN`) as a binary NUMERIC payload
pub(crate) fn encode(text: &str, out: &mut BytesMut) -> Result<(), BoxError> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("nan") {
        out.put_i16(0);
        out.put_i16(0);
        out.put_u16(SIGN_NAN);
        out.put_i16(0);
        return Ok(());
    }

    let (negative, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (integer, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let valid = |part: &str| part.chars().all(|c| c.is_ascii_digit());
    if (integer.is_empty() && fraction.is_empty()) || !valid(integer) || !valid(fraction) {
        return Err(format!("invalid numeric value: {}", text).into());
    }

    let integer = integer.trim_start_matches('0');
    let dscale = fraction.len();

    let mut padded_integer = "0".repeat((4 - integer.len() % 4) % 4);
    padded_integer.push_str(integer);
    let mut padded_fraction = fraction.to_string();
    padded_fraction.push_str(&"0".repeat((4 - fraction.len() % 4) % 4));

    let to_groups = |digits: &str| -> Vec<i16> {
        digits
            .as_bytes()
            .chunks(4)
            .map(|chunk| {
                chunk
                    .iter()
                    .fold(0i16, |acc, d| acc * 10 + (d - b'0') as i16)
            })
            .collect()
    };
    let integer_groups = to_groups(&padded_integer);
    let mut weight = integer_groups.len() as i32 - 1;
    let mut groups = integer_groups;
    groups.extend(to_groups(&padded_fraction));

    while groups.first() == Some(&0) {
        groups.remove(0);
        weight -= 1;
    }
    while groups.last() == Some(&0) {
        groups.pop();
    }
    if groups.is_empty() {
        weight = 0;
    }

    out.put_i16(i16::try_from(groups.len())?);
    out.put_i16(i16::try_from(weight)?);
    out.put_u16(if negative && !groups.is_empty() {
        SIGN_NEGATIVE
    } else {
        SIGN_POSITIVE
    });
    out.put_i16(i16::try_from(dscale)?);
    for group in groups {
        out.put_i16(group);
    }
    Ok(())
}
