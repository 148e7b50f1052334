//! Token parsers for the RFC 4512 schema description grammar.

use nom::IResult;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::{char, digit1, multispace0, multispace1};
use nom::combinator::{opt, recognize, verify};
use nom::multi::{many0, separated_list1};
use nom::sequence::{delimited, preceded, tuple};

pub(super) fn wsp(i: &str) -> IResult<&str, &str> {
    multispace0(i)
}

fn number(i: &str) -> IResult<&str, &str> {
    verify(digit1, |d: &str| d.len() == 1 || !d.starts_with('0'))(i)
}

pub(super) fn numericoid(i: &str) -> IResult<&str, &str> {
    recognize(tuple((number, many0(preceded(char('.'), number)))))(i)
}

fn is_keychar(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-'
}

pub(super) fn descr(i: &str) -> IResult<&str, &str> {
    verify(take_while1(is_keychar), |s: &str| {
        s.starts_with(|c: char| c.is_ascii_alphabetic())
    })(i)
}

/// An OID reference: a numeric OID or a short name.
pub(super) fn oid(i: &str) -> IResult<&str, &str> {
    alt((numericoid, descr))(i)
}

/// `oid` or a `$`-separated parenthesised list of them.
pub(super) fn oids(i: &str) -> IResult<&str, Vec<String>> {
    alt((
        |i| {
            let (i, list) = delimited(
                tuple((char('('), wsp)),
                separated_list1(tuple((wsp, char('$'), wsp)), oid),
                tuple((wsp, char(')'))),
            )(i)?;
            Ok((i, list.into_iter().map(str::to_owned).collect()))
        },
        |i| {
            let (i, one) = oid(i)?;
            Ok((i, vec![one.to_owned()]))
        },
    ))(i)
}

fn qdescr(i: &str) -> IResult<&str, &str> {
    delimited(char('\''), descr, char('\''))(i)
}

/// A quoted name or a parenthesised list of quoted names.
pub(super) fn qdescrs(i: &str) -> IResult<&str, Vec<String>> {
    alt((
        |i| {
            let (i, list) = delimited(
                tuple((char('('), wsp)),
                separated_list1(multispace1, qdescr),
                tuple((wsp, char(')'))),
            )(i)?;
            Ok((i, list.into_iter().map(str::to_owned).collect()))
        },
        |i| {
            let (i, one) = qdescr(i)?;
            Ok((i, vec![one.to_owned()]))
        },
    ))(i)
}

/// A quoted UTF-8 string with `\27`/`\5c` escapes.
pub(super) fn qdstring(i: &str) -> IResult<&str, String> {
    let (i, raw) = delimited(
        char('\''),
        recognize(many0(alt((
            take_while1(|c: char| c != '\'' && c != '\\'),
            tag("\\27"),
            tag("\\5c"),
            tag("\\5C"),
        )))),
        char('\''),
    )(i)?;
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(pos) = rest.find('\\') {
        out.push_str(&rest[..pos]);
        match rest.as_bytes().get(pos + 1..pos + 3) {
            Some(b"27") => out.push('\''),
            Some(b"5c") | Some(b"5C") => out.push('\\'),
            _ => out.push('\\'),
        }
        rest = &rest[(pos + 3).min(rest.len())..];
    }
    out.push_str(rest);
    Ok((i, out))
}

/// `numericoid` with an optional `{len}` suffix.
pub(super) fn noidlen(i: &str) -> IResult<&str, (String, Option<usize>)> {
    let (i, oid) = numericoid(i)?;
    let (i, len) = opt(delimited(char('{'), digit1, char('}')))(i)?;
    Ok((
        i,
        (oid.to_owned(), len.and_then(|l| l.parse::<usize>().ok())),
    ))
}

/// A specific keyword token followed by whitespace or a closing paren.
pub(super) fn keyword<'a>(i: &'a str, kw: &'static str) -> IResult<&'a str, ()> {
    let (i, _) = wsp(i)?;
    let (i, _) = tag(kw)(i)?;
    match i.chars().next() {
        Some(c) if is_keychar(c) => Err(nom::Err::Error(nom::error::Error::new(
            i,
            nom::error::ErrorKind::Tag,
        ))),
        _ => Ok((i, ())),
    }
}

/// Skip an `X-`-prefixed extension with its qdstring value(s).
pub(super) fn extension(i: &str) -> IResult<&str, ()> {
    let (i, _) = wsp(i)?;
    let (i, _) = recognize(tuple((tag("X-"), take_while1(is_keychar))))(i)?;
    let (i, _) = wsp(i)?;
    let (i, _) = alt((
        |i| {
            let (i, _) = delimited(
                tuple((char('('), wsp)),
                separated_list1(multispace1, qdstring),
                tuple((wsp, char(')'))),
            )(i)?;
            Ok((i, ()))
        },
        |i| {
            let (i, _) = qdstring(i)?;
            Ok((i, ()))
        },
    ))(i)?;
    Ok((i, ()))
}

pub(super) fn many_extensions(i: &str) -> IResult<&str, ()> {
    let (i, _) = many0(extension)(i)?;
    Ok((i, ()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn oids_single_and_list() {
        assert_eq!(oids("cn").unwrap().1, vec!["cn".to_owned()]);
        assert_eq!(
            oids("( sn $ cn )").unwrap().1,
            vec!["sn".to_owned(), "cn".to_owned()]
        );
    }

    #[test]
    fn qdescrs_forms() {
        assert_eq!(qdescrs("'cn'").unwrap().1, vec!["cn".to_owned()]);
        assert_eq!(
            qdescrs("( 'cn' 'commonName' )").unwrap().1,
            vec!["cn".to_owned(), "commonName".to_owned()]
        );
    }

    #[test]
    fn qdstring_escapes() {
        assert_eq!(qdstring("'it\\27s'").unwrap().1, "it's");
    }

    #[test]
    fn noidlen_with_bound() {
        let (_, (oid, len)) = noidlen("1.3.6.1.4.1.1466.115.121.1.15{32768}").unwrap();
        assert_eq!(oid, "1.3.6.1.4.1.1466.115.121.1.15");
        assert_eq!(len, Some(32768));
    }
}
