// .tarnc bytecode images
// Hand-rolled binary format: magic, version, constants, code, globals, spans

use crate::compiler::chunk::{Chunk, Constant, FunctionConstant};
use crate::error::{Position, Span};
use std::rc::Rc;

const MAGIC: &[u8; 4] = b"TARN";
const VERSION: u8 = 1;

const TAG_NUMBER: u8 = 0;
const TAG_STRING: u8 = 1;
const TAG_FUNCTION: u8 = 2;

pub fn serialize(chunk: &Chunk) -> Vec<u8> {
    let mut out = Vec::new();

    out.extend_from_slice(MAGIC);
    out.push(VERSION);

    write_u32(&mut out, chunk.constants.len() as u32);
    for constant in &chunk.constants {
        match constant {
            Constant::Number(n) => {
                out.push(TAG_NUMBER);
                out.extend_from_slice(&n.to_le_bytes());
            }
            Constant::Str(s) => {
                out.push(TAG_STRING);
                write_string(&mut out, s);
            }
            Constant::Function(f) => {
                out.push(TAG_FUNCTION);
                write_string(&mut out, &f.name);
                write_u32(&mut out, f.arity as u32);
                write_u32(&mut out, f.entry.get() as u32);
            }
        }
    }

    write_u32(&mut out, chunk.code.len() as u32);
    for slot in &chunk.code {
        out.extend_from_slice(&slot.to_le_bytes());
    }

    write_u32(&mut out, chunk.globals.len() as u32);
    for name in &chunk.globals {
        write_string(&mut out, name);
    }

    write_u32(&mut out, chunk.spans.len() as u32);
    for span in &chunk.spans {
        write_u32(&mut out, span.start.line as u32);
        write_u32(&mut out, span.start.column as u32);
        write_u32(&mut out, span.end.line as u32);
        write_u32(&mut out, span.end.column as u32);
    }

    out
}

pub fn deserialize(data: &[u8]) -> Result<Chunk, String> {
    let mut cursor = 0;

    if data.len() < 5 {
        return Err("Invalid file: too short".to_string());
    }
    if &data[0..4] != MAGIC {
        return Err("Invalid file: not a .tarnc image".to_string());
    }
    cursor += 4;

    let version = data[cursor];
    if version != VERSION {
        return Err(format!("Unsupported version: {}", version));
    }
    cursor += 1;

    let constant_count = read_u32(data, &mut cursor)? as usize;
    let mut constants = Vec::with_capacity(constant_count);
    for _ in 0..constant_count {
        let tag = read_u8(data, &mut cursor)?;
        let constant = match tag {
            TAG_NUMBER => {
                let bytes = read_bytes(data, &mut cursor, 8)?;
                Constant::Number(f64::from_le_bytes(bytes.try_into().unwrap()))
            }
            TAG_STRING => Constant::Str(Rc::from(read_string(data, &mut cursor)?)),
            TAG_FUNCTION => {
                let name = read_string(data, &mut cursor)?;
                let arity = read_u32(data, &mut cursor)? as usize;
                let entry = read_u32(data, &mut cursor)? as usize;
                let func = FunctionConstant::new(name, arity);
                func.entry.set(entry);
                Constant::Function(Rc::new(func))
            }
            _ => return Err(format!("Unknown constant tag: {}", tag)),
        };
        constants.push(constant);
    }

    let code_len = read_u32(data, &mut cursor)? as usize;
    let mut code = Vec::with_capacity(code_len);
    for _ in 0..code_len {
        let bytes = read_bytes(data, &mut cursor, 4)?;
        code.push(i32::from_le_bytes(bytes.try_into().unwrap()));
    }

    let globals_len = read_u32(data, &mut cursor)? as usize;
    let mut globals = Vec::with_capacity(globals_len);
    for _ in 0..globals_len {
        globals.push(read_string(data, &mut cursor)?);
    }

    let spans_len = read_u32(data, &mut cursor)? as usize;
    let mut spans = Vec::with_capacity(spans_len);
    for _ in 0..spans_len {
        let start_line = read_u32(data, &mut cursor)? as usize;
        let start_col = read_u32(data, &mut cursor)? as usize;
        let end_line = read_u32(data, &mut cursor)? as usize;
        let end_col = read_u32(data, &mut cursor)? as usize;
        spans.push(Span::new(
            Position::new(start_line, start_col, 0),
            Position::new(end_line, end_col, 0),
        ));
    }

    Ok(Chunk::from_parts(code, constants, globals, spans))
}

fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    write_u32(out, s.len() as u32);
    out.extend_from_slice(s.as_bytes());
}

fn read_u8(data: &[u8], cursor: &mut usize) -> Result<u8, String> {
    if *cursor >= data.len() {
        return Err("Invalid file: truncated".to_string());
    }
    let value = data[*cursor];
    *cursor += 1;
    Ok(value)
}

fn read_u32(data: &[u8], cursor: &mut usize) -> Result<u32, String> {
    let bytes = read_bytes(data, cursor, 4)?;
    Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_bytes<'a>(data: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8], String> {
    if *cursor + len > data.len() {
        return Err("Invalid file: truncated".to_string());
    }
    let bytes = &data[*cursor..*cursor + len];
    *cursor += len;
    Ok(bytes)
}

fn read_string(data: &[u8], cursor: &mut usize) -> Result<String, String> {
    let len = read_u32(data, cursor)? as usize;
    let bytes = read_bytes(data, cursor, len)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| "Invalid file: bad string".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use crate::lexer::Scanner;
    use crate::parser::Parser;

    fn compile(source: &str) -> Chunk {
        let tokens = Scanner::new(source, "<test>").scan_tokens().unwrap();
        let program = Parser::new(tokens, "<test>", source).parse().unwrap();
        Compiler::new("<test>", source).compile(&program).unwrap()
    }

    #[test]
    fn test_round_trip_preserves_chunk() {
        let chunk = compile(
            "fun add(x, y) { return x + y; } var msg = \"hi\"; print(msg, add(1, 2.5));",
        );
        let bytes = serialize(&chunk);
        let restored = deserialize(&bytes).unwrap();

        assert_eq!(restored.code, chunk.code);
        assert_eq!(restored.globals, chunk.globals);
        assert_eq!(restored.constants.len(), chunk.constants.len());
        assert_eq!(restored.spans.len(), chunk.spans.len());

        for (a, b) in chunk.constants.iter().zip(restored.constants.iter()) {
            match (a, b) {
                (Constant::Number(x), Constant::Number(y)) => assert_eq!(x, y),
                (Constant::Str(x), Constant::Str(y)) => assert_eq!(x, y),
                (Constant::Function(x), Constant::Function(y)) => {
                    assert_eq!(x.name, y.name);
                    assert_eq!(x.arity, y.arity);
                    assert_eq!(x.entry.get(), y.entry.get());
                }
                _ => panic!("constant kind changed across round trip"),
            }
        }
    }

    #[test]
    fn test_deserialized_chunk_executes() {
        use crate::vm::VM;

        let chunk = compile("var x = 40; x + 2;");
        let restored = deserialize(&serialize(&chunk)).unwrap();

        let mut vm = VM::with_writer(Box::new(std::io::sink()));
        let value = vm.run(&restored, "<test>", "").unwrap();
        assert_eq!(value, crate::vm::Value::Number(42.0));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let err = deserialize(b"NOPE\x01rest").unwrap_err();
        assert!(err.contains("not a .tarnc image"));
    }

    #[test]
    fn test_truncated_image_rejected() {
        let chunk = compile("1;");
        let bytes = serialize(&chunk);
        let err = deserialize(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(err.contains("truncated"));
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let chunk = compile("1;");
        let mut bytes = serialize(&chunk);
        bytes[4] = 99;
        let err = deserialize(&bytes).unwrap_err();
        assert!(err.contains("Unsupported version"));
    }
}
