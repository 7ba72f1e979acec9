//! 内核源码的最小前端：检查括号配对和 `#error`，找出 `__kernel` 函数并解析参数表。

use std::collections::HashMap;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(super) enum ParamKind {
    /// `__global` 或 `__constant` 指针。
    Global,
    /// `__local` 指针。
    Local,
    /// 按值传递，大小未知时为 `None`。
    Scalar(Option<usize>),
}

#[derive(Clone, Debug)]
pub(super) struct KernelDecl {
    pub name: String,
    pub params: Vec<ParamKind>,
}

#[derive(Clone, Copy, Debug)]
struct Token<'a> {
    text: &'a str,
    line: usize,
}

/// 解析程序中定义的内核，失败时返回编译日志。
pub(super) fn parse(src: &str) -> Result<Vec<KernelDecl>, String> {
    let mut log = Vec::new();
    let tokens = tokenize(src, &mut log);
    check_brackets(&tokens, &mut log);
    if !log.is_empty() {
        return Err(log.join("\n"));
    }

    let mut kernels = Vec::<KernelDecl>::new();
    let mut depth = 0usize;
    let mut i = 0;
    while i < tokens.len() {
        match tokens[i].text {
            "{" => depth += 1,
            "}" => depth = depth.saturating_sub(1),
            "__kernel" | "kernel" if depth == 0 => match declaration(&tokens, i + 1) {
                Ok((decl, next)) => {
                    if let Some(decl) = decl {
                        if kernels.iter().any(|k| k.name == decl.name) {
                            log.push(format!(
                                "line {}: error: redefinition of kernel `{}`",
                                tokens[i].line, decl.name
                            ))
                        } else {
                            kernels.push(decl)
                        }
                    }
                    i = next;
                    continue;
                }
                Err(e) => {
                    log.push(e);
                    break;
                }
            },
            _ => {}
        }
        i += 1
    }

    if log.is_empty() {
        Ok(kernels)
    } else {
        Err(log.join("\n"))
    }
}

/// 解析编译选项，返回 `-D` 定义的宏。
pub(super) fn parse_options(options: &str) -> Result<HashMap<String, String>, String> {
    let mut defines = HashMap::new();
    let mut words = options.split_whitespace();
    while let Some(word) = words.next() {
        if let Some(def) = word.strip_prefix("-D") {
            let def = if def.is_empty() {
                words.next().ok_or("error: macro name missing after -D")?
            } else {
                def
            };
            let (name, value) = def.split_once('=').unwrap_or((def, "1"));
            if name.is_empty() {
                return Err(format!("error: macro name missing in `-D{def}`"));
            }
            defines.insert(name.to_string(), value.to_string());
        } else if word == "-I" {
            words.next().ok_or("error: directory missing after -I")?;
        } else if !(word.starts_with("-I")
            || word.starts_with("-cl-")
            || word == "-w"
            || word == "-Werror")
        {
            return Err(format!("error: invalid build option `{word}`"));
        }
    }
    Ok(defines)
}

fn tokenize<'a>(src: &'a str, log: &mut Vec<String>) -> Vec<Token<'a>> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut line = 1;
    let mut line_start = true;
    let mut i = 0;
    while i < bytes.len() {
        let start = i;
        match bytes[i] {
            b'\n' => {
                line += 1;
                line_start = true;
                i += 1;
                continue;
            }
            b' ' | b'\t' | b'\r' | 0x0b | 0x0c => {
                i += 1;
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1
                }
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let first = line;
                i += 2;
                loop {
                    if i + 1 >= bytes.len() {
                        log.push(format!("line {first}: error: unterminated comment"));
                        return tokens;
                    }
                    if bytes[i] == b'*' && bytes[i + 1] == b'/' {
                        i += 2;
                        break;
                    }
                    if bytes[i] == b'\n' {
                        line += 1
                    }
                    i += 1
                }
                continue;
            }
            b'#' if line_start => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1
                }
                let directive = src[start + 1..i].trim_start();
                if let Some(message) = directive.strip_prefix("error") {
                    log.push(format!("line {line}: error: #error{message}"))
                }
                continue;
            }
            quote @ (b'"' | b'\'') => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote && bytes[i] != b'\n' {
                    i += if bytes[i] == b'\\' { 2 } else { 1 }
                }
                if bytes.get(i) != Some(&quote) {
                    log.push(format!(
                        "line {line}: error: missing terminating {} character",
                        quote as char
                    ));
                    return tokens;
                }
                i += 1
            }
            c if c == b'_' || c.is_ascii_alphabetic() => {
                while i < bytes.len() && (bytes[i] == b'_' || bytes[i].is_ascii_alphanumeric()) {
                    i += 1
                }
            }
            c if c.is_ascii_digit() => {
                while i < bytes.len()
                    && (bytes[i] == b'.' || bytes[i] == b'_' || bytes[i].is_ascii_alphanumeric())
                {
                    i += 1
                }
            }
            _ => i += src[i..].chars().next().map_or(1, char::len_utf8),
        }
        line_start = false;
        tokens.push(Token {
            text: &src[start..i],
            line,
        })
    }
    tokens
}

fn check_brackets(tokens: &[Token], log: &mut Vec<String>) {
    let mut stack = Vec::<Token>::new();
    for &token in tokens {
        match token.text {
            "(" | "[" | "{" => stack.push(token),
            close @ (")" | "]" | "}") => {
                let open = match close {
                    ")" => "(",
                    "]" => "[",
                    _ => "{",
                };
                match stack.pop() {
                    Some(top) if top.text == open => {}
                    Some(top) => {
                        log.push(format!(
                            "line {}: error: '{close}' does not match '{}' at line {}",
                            token.line, top.text, top.line
                        ));
                        return;
                    }
                    None => {
                        log.push(format!("line {}: error: unexpected '{close}'", token.line));
                        return;
                    }
                }
            }
            _ => {}
        }
    }
    for open in stack {
        log.push(format!("line {}: error: '{}' is never closed", open.line, open.text))
    }
}

/// 从 `__kernel` 之后开始解析一个内核声明，返回定义和下一个位置。只有原型的声明返回 `None`。
fn declaration(tokens: &[Token], mut i: usize) -> Result<(Option<KernelDecl>, usize), String> {
    let at = |i: usize| tokens.get(i).or(tokens.last());
    let error = |i: usize, msg: &str| {
        format!("line {}: error: {msg}", at(i).map_or(1, |t| t.line))
    };

    while tokens.get(i).map(|t| t.text) == Some("__attribute__") {
        i = group_end(tokens, i + 1).ok_or_else(|| error(i, "expected '(' after __attribute__"))?
    }
    if tokens.get(i).map(|t| t.text) != Some("void") {
        return Err(error(i, "kernel functions must return void"));
    }
    let name = match tokens.get(i + 1) {
        Some(t) if is_ident(t.text) => t.text,
        _ => return Err(error(i + 1, "expected kernel name")),
    };
    let end = group_end(tokens, i + 2)
        .ok_or_else(|| error(i + 2, "expected '(' after kernel name"))?;

    let mut params = Vec::new();
    let inner = &tokens[i + 3..end - 1];
    if !(inner.is_empty() || matches!(inner, [t] if t.text == "void")) {
        let mut depth = 0usize;
        let mut group = Vec::new();
        for (k, t) in inner.iter().enumerate() {
            match t.text {
                "(" | "[" => depth += 1,
                ")" | "]" => depth = depth.saturating_sub(1),
                "," if depth == 0 => {
                    params.push(param(&group).map_err(|e| error(i + 3 + k, &e))?);
                    group.clear();
                    continue;
                }
                _ => {}
            }
            group.push(t.text)
        }
        params.push(param(&group).map_err(|e| error(end - 1, &e))?);
    }

    match tokens.get(end).map(|t| t.text) {
        Some("{") => Ok((
            Some(KernelDecl {
                name: name.to_string(),
                params,
            }),
            end,
        )),
        Some(";") => Ok((None, end + 1)),
        _ => Err(error(end, &format!("expected body of kernel `{name}`"))),
    }
}

/// `tokens[i]` 是 `(` 时返回配对的 `)` 之后的位置。
fn group_end(tokens: &[Token], i: usize) -> Option<usize> {
    if tokens.get(i)?.text != "(" {
        return None;
    }
    let mut depth = 0usize;
    for (k, t) in tokens[i..].iter().enumerate() {
        match t.text {
            "(" => depth += 1,
            ")" => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + k + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn param(words: &[&str]) -> Result<ParamKind, String> {
    let Some(&name) = words.last().filter(|w| is_ident(w)) else {
        return Err("expected parameter name".into());
    };
    if words.contains(&"*") {
        let global = |w: &&str| matches!(*w, "__global" | "global" | "__constant" | "constant");
        return if words.iter().any(global) {
            Ok(ParamKind::Global)
        } else if words.iter().any(|w| matches!(*w, "__local" | "local")) {
            Ok(ParamKind::Local)
        } else {
            Err(format!("pointer parameter `{name}` must be global, constant or local"))
        };
    }

    let ty = words[..words.len() - 1]
        .iter()
        .copied()
        .filter(|w| {
            !matches!(
                *w,
                "const"
                    | "__const"
                    | "volatile"
                    | "restrict"
                    | "__private"
                    | "private"
                    | "signed"
                    | "unsigned"
            )
        })
        .last();
    let ty = match ty {
        Some(ty) => ty,
        None if words.contains(&"unsigned") || words.contains(&"signed") => "int",
        None => return Err(format!("parameter `{name}` has no type")),
    };
    Ok(ParamKind::Scalar(scalar_size(ty)))
}

fn scalar_size(ty: &str) -> Option<usize> {
    fn base(name: &str) -> Option<usize> {
        match name {
            "char" | "uchar" | "bool" => Some(1),
            "short" | "ushort" | "half" => Some(2),
            "int" | "uint" | "float" => Some(4),
            "long" | "ulong" | "double" | "size_t" | "ptrdiff_t" | "intptr_t" | "uintptr_t" => {
                Some(8)
            }
            _ => None,
        }
    }

    if let Some(size) = base(ty) {
        return Some(size);
    }
    let (name, lanes) = ty.split_at(ty.find(|c: char| c.is_ascii_digit())?);
    let lanes = match lanes.parse().ok()? {
        3 => 4,
        n @ (2 | 4 | 8 | 16) => n,
        _ => return None,
    };
    Some(base(name)? * lanes)
}

fn is_ident(text: &str) -> bool {
    text.starts_with(|c: char| c == '_' || c.is_ascii_alphabetic())
}

#[cfg(test)]
mod test {
    use super::{parse, parse_options, ParamKind::*};

    #[test]
    fn test_kernels() {
        let src = "
// helper
inline float twice(float x) { return 2 * x; }

/* kernels */
__kernel void a(__global float *out, __global const float4 *in, uint n, float2 k,
                __local float *tmp)
{
  if (n > 0) { out[0] = twice(in[0].x); }
}

kernel __attribute__((reqd_work_group_size(64, 1, 1))) void b(void) {}
__kernel void c(unsigned n, struct foo f);
";
        let kernels = parse(src).unwrap();
        assert_eq!(kernels.len(), 2);
        assert_eq!(kernels[0].name, "a");
        assert_eq!(
            kernels[0].params,
            [Global, Global, Scalar(Some(4)), Scalar(Some(8)), Local]
        );
        assert_eq!(kernels[1].name, "b");
        assert!(kernels[1].params.is_empty());
    }

    #[test]
    fn test_errors() {
        let log = parse("__kernel void a(__global int *x)\n{\n  x[0] = (1;\n}\n").unwrap_err();
        assert!(log.starts_with("line 4:") && log.contains("at line 3"), "{log}");

        let log = parse("#error no device support\n__kernel void a() {}").unwrap_err();
        assert_eq!(log, "line 1: error: #error no device support");

        let log = parse("__kernel int a() { return 0; }").unwrap_err();
        assert!(log.contains("must return void"), "{log}");

        let log = parse("__kernel void a(int *x) {}").unwrap_err();
        assert!(log.contains("`x`"), "{log}");

        let log = parse("/* open\n\n").unwrap_err();
        assert!(log.contains("unterminated comment"), "{log}");

        let log = parse("__kernel void a() {}\n__kernel void a() {}").unwrap_err();
        assert!(log.starts_with("line 2:"), "{log}");
    }

    #[test]
    fn test_options() {
        let defines = parse_options("-D N=16 -DFAST -cl-mad-enable -I include -w").unwrap();
        assert_eq!(defines["N"], "16");
        assert_eq!(defines["FAST"], "1");

        assert!(parse_options("").unwrap().is_empty());
        assert!(parse_options("-D").is_err());
        assert!(parse_options("-O3").is_err());
        assert!(parse_options("fast").is_err());
    }
}
