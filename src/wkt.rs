//! EWKT encoding of trip geometry for spatial database columns.
//!
//! Output is always `SRID=4326;MULTILINESTRING(...)` with (longitude latitude)
//! pairs. The reader also accepts `LINESTRING`, an optional `SRID=n;` prefix,
//! `Z`/`M`/`ZM` dimension tags (extra ordinates are dropped) and `EMPTY`.

use log::debug;

use crate::{Coordinate, DecodeError, MultiTrack, Track};

/// Spatial reference identifier for WGS84.
pub const WGS84_SRID: i32 = 4326;

/// Encode tracks as EWKT.
///
/// # Example
/// ```
/// use trip_geometry::{to_ewkt, Coordinate, MultiTrack, Track};
///
/// let track = Track::new(vec![Coordinate::new(-0.1278, 51.5074), Coordinate::new(-0.129, 51.508)]).unwrap();
/// assert_eq!(
///     to_ewkt(&MultiTrack::new(vec![track])),
///     "SRID=4326;MULTILINESTRING((-0.1278 51.5074, -0.129 51.508))"
/// );
/// ```
pub fn to_ewkt(tracks: &MultiTrack) -> String {
    if tracks.is_empty() {
        return format!("SRID={};MULTILINESTRING EMPTY", WGS84_SRID);
    }

    let lines: Vec<String> = tracks
        .tracks()
        .iter()
        .map(|track| {
            let coords: Vec<String> = track
                .coords()
                .iter()
                .map(|c| format!("{} {}", c.longitude, c.latitude))
                .collect();
            format!("({})", coords.join(", "))
        })
        .collect();

    format!("SRID={};MULTILINESTRING({})", WGS84_SRID, lines.join(", "))
}

/// Decode a `LINESTRING` or `MULTILINESTRING`, with or without an SRID prefix.
///
/// Lines with fewer than 2 valid points are dropped.
pub fn parse_ewkt(text: &str) -> Result<MultiTrack, DecodeError> {
    let body = strip_srid(text.trim())?;
    let mut cursor = WktCursor::new(body);

    let tag = cursor.word().to_ascii_uppercase();
    let multi = match tag.as_str() {
        "LINESTRING" => false,
        "MULTILINESTRING" => true,
        "" => return Err(DecodeError::Wkt("missing geometry type".to_string())),
        other => return Err(DecodeError::Unsupported(other.to_string())),
    };

    let mut modifier = cursor.word();
    if matches!(modifier.to_ascii_uppercase().as_str(), "Z" | "M" | "ZM") {
        modifier = cursor.word();
    }

    let lines = if modifier.eq_ignore_ascii_case("EMPTY") {
        Vec::new()
    } else if !modifier.is_empty() {
        return Err(DecodeError::Wkt(format!("unexpected token '{}'", modifier)));
    } else if multi {
        cursor.lines()?
    } else {
        vec![cursor.line()?]
    };

    if !cursor.at_end() {
        return Err(DecodeError::Wkt(format!(
            "trailing input at offset {}",
            cursor.pos
        )));
    }

    Ok(lines.into_iter().filter_map(Track::new).collect())
}

fn strip_srid(text: &str) -> Result<&str, DecodeError> {
    let has_prefix = text
        .get(..5)
        .map_or(false, |prefix| prefix.eq_ignore_ascii_case("SRID="));
    if !has_prefix {
        return Ok(text);
    }

    let (srid, body) = text[5..]
        .split_once(';')
        .ok_or_else(|| DecodeError::Wkt("SRID prefix without ';'".to_string()))?;
    let srid: i32 = srid
        .trim()
        .parse()
        .map_err(|_| DecodeError::Wkt(format!("invalid SRID '{}'", srid)))?;
    if srid != WGS84_SRID {
        debug!("[TripGeometry] Reading geometry tagged SRID={}, treating as WGS84", srid);
    }
    Ok(body)
}

struct WktCursor<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> WktCursor<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if !c.is_whitespace() {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    fn at_end(&mut self) -> bool {
        self.skip_whitespace();
        self.pos == self.input.len()
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_whitespace();
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), DecodeError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(DecodeError::Wkt(format!(
                "expected '{}' at offset {}",
                expected, self.pos
            )))
        }
    }

    /// Alphabetic keyword, or "" if the next token is not one.
    fn word(&mut self) -> &'a str {
        self.skip_whitespace();
        let input = self.input;
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !c.is_ascii_alphabetic() {
                break;
            }
            self.pos += 1;
        }
        &input[start..self.pos]
    }

    fn number(&mut self) -> Result<f64, DecodeError> {
        self.skip_whitespace();
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !(c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E')) {
                break;
            }
            self.pos += 1;
        }
        let token = &self.input[start..self.pos];
        token
            .parse()
            .map_err(|_| DecodeError::Wkt(format!("invalid number '{}' at offset {}", token, start)))
    }

    fn position(&mut self) -> Result<Coordinate, DecodeError> {
        let x = self.number()?;
        let y = self.number()?;
        // Z / M ordinates
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(',') | Some(')') | None => break,
                _ => {
                    self.number()?;
                }
            }
        }
        Ok(Coordinate::new(x, y))
    }

    fn line(&mut self) -> Result<Vec<Coordinate>, DecodeError> {
        self.expect('(')?;
        let mut coords = vec![self.position()?];
        while self.eat(',') {
            coords.push(self.position()?);
        }
        self.expect(')')?;
        Ok(coords)
    }

    fn lines(&mut self) -> Result<Vec<Vec<Coordinate>>, DecodeError> {
        self.expect('(')?;
        let mut lines = vec![self.line()?];
        while self.eat(',') {
            lines.push(self.line()?);
        }
        self.expect(')')?;
        Ok(lines)
    }
}
