//! Textual listing format parser.
//!
//! A listing describes a small program: its architecture, functions and
//! their instructions (with explicit operand roles), pointer-sized memory
//! cells and a snapshot of the current thread. Each line holds one
//! directive, `;` starts a comment:
//!
//! ```text
//! arch x64
//! module app
//! mem 0x3000 0x4000
//! ip 0x100
//! frame app!main+0x10
//! function main
//!   0x100 8 mov >rax, <qword [rbx+0x8]
//!   0x108 5 call <[0x3000]
//!   0x10d 1 ret
//! function callee
//!   0x4000 1 push <rbx !live rcx:0, rdx:0, stack:8
//! ```
//!
//! A generic architecture is declared with `arch generic <pointer bytes>`,
//! followed by `reg <name> <sub-registers...>`, `preserve <names...>` and
//! `return <name>` directives. Operands are prefixed with `<` (read), `>`
//! (written) or `<>` (read and written); unprefixed operands are read.

use crate::arch::{Arch, PointerWidth};
use crate::errors::{DisasmError, DisasmResult};
use crate::instrs::{Instruction, LiveVariable, LocationKind};
use crate::operands::{MemRef, Operand};
use crate::program::Program;
use crate::registers::Register;
use crate::Addr;
use nom::branch::alt;
use nom::bytes::complete::{tag, tag_no_case, take_while, take_while1};
use nom::character::complete::{char, digit1, hex_digit1, space0, space1};
use nom::combinator::{all_consuming, map, map_res, opt, recognize, rest, value};
use nom::multi::{many0, separated_list0, separated_list1};
use nom::sequence::{delimited, pair, preceded, terminated, tuple};
use nom::IResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Direction {
    input: bool,
    output: bool,
}

#[derive(Debug, PartialEq)]
enum MemTerm<'a> {
    Reg(&'a str, Option<u8>),
    Disp(i64),
}

#[derive(Debug, PartialEq)]
enum RawOperand<'a> {
    Reg(Direction, &'a str),
    Mem(Direction, Option<u32>, Vec<MemTerm<'a>>),
    Imm(u64),
}

#[derive(Debug, PartialEq)]
struct RawInstr<'a> {
    addr: u64,
    size: Option<u64>,
    mnemonic: &'a str,
    operands: Vec<RawOperand<'a>>,
    live: Vec<(&'a str, i64)>,
}

#[derive(Debug, PartialEq)]
enum Line<'a> {
    Empty,
    ArchX64,
    ArchGeneric(u64),
    Module(&'a str),
    Reg(&'a str, Vec<&'a str>),
    Preserve(Vec<&'a str>),
    Return(&'a str),
    Mem(u64, u64),
    Ip(u64),
    Frame(&'a str),
    Function(&'a str),
    Instr(RawInstr<'a>),
}

fn number(input: &str) -> IResult<&str, u64> {
    alt((
        map_res(preceded(tag_no_case("0x"), hex_digit1), |s| {
            u64::from_str_radix(s, 16)
        }),
        map_res(digit1, str::parse::<u64>),
    ))(input)
}

fn signed(input: &str) -> IResult<&str, i64> {
    map(pair(opt(char('-')), number), |(neg, n)| {
        if neg.is_some() {
            (n as i64).wrapping_neg()
        } else {
            n as i64
        }
    })(input)
}

fn ident(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || "_.@$?".contains(c)),
    ))(input)
}

fn symbol(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !c.is_whitespace())(input)
}

fn direction(input: &str) -> IResult<&str, Direction> {
    map(
        opt(alt((
            value(
                Direction {
                    input: true,
                    output: true,
                },
                tag("<>"),
            ),
            value(
                Direction {
                    input: true,
                    output: false,
                },
                tag("<"),
            ),
            value(
                Direction {
                    input: false,
                    output: true,
                },
                tag(">"),
            ),
        ))),
        |dir| {
            dir.unwrap_or(Direction {
                input: true,
                output: false,
            })
        },
    )(input)
}

fn mem_size(input: &str) -> IResult<&str, u32> {
    terminated(
        alt((
            value(1, tag_no_case("byte")),
            value(2, tag_no_case("word")),
            value(4, tag_no_case("dword")),
            value(8, tag_no_case("qword")),
        )),
        space1,
    )(input)
}

fn mem_term(input: &str) -> IResult<&str, MemTerm> {
    alt((
        map(number, |n| MemTerm::Disp(n as i64)),
        map(
            pair(
                ident,
                opt(preceded(
                    delimited(space0, char('*'), space0),
                    map_res(digit1, str::parse::<u8>),
                )),
            ),
            |(reg, scale)| MemTerm::Reg(reg, scale),
        ),
    ))(input)
}

fn mem_expr(input: &str) -> IResult<&str, Vec<MemTerm>> {
    let (input, first) = mem_term(input)?;
    let (input, others) = many0(pair(
        delimited(space0, alt((char('+'), char('-'))), space0),
        mem_term,
    ))(input)?;

    let mut terms = vec![first];
    for (sign, term) in others {
        match (sign, term) {
            ('-', MemTerm::Disp(d)) => terms.push(MemTerm::Disp(d.wrapping_neg())),
            (_, term) => terms.push(term),
        }
    }
    Ok((input, terms))
}

fn operand(input: &str) -> IResult<&str, RawOperand> {
    let (input, dir) = direction(input)?;
    alt((
        map(preceded(char('#'), number), RawOperand::Imm),
        map(
            pair(
                opt(mem_size),
                delimited(
                    pair(char('['), space0),
                    mem_expr,
                    pair(space0, char(']')),
                ),
            ),
            move |(size, terms)| RawOperand::Mem(dir, size, terms),
        ),
        map(ident, move |reg| RawOperand::Reg(dir, reg)),
    ))(input)
}

fn live_variables(input: &str) -> IResult<&str, Vec<(&str, i64)>> {
    preceded(
        pair(tag("!live"), space1),
        separated_list1(
            delimited(space0, char(','), space0),
            pair(ident, preceded(char(':'), signed)),
        ),
    )(input)
}

fn instruction(input: &str) -> IResult<&str, RawInstr> {
    map(
        tuple((
            number,
            opt(preceded(space1, number)),
            preceded(space1, ident),
            opt(preceded(
                space1,
                separated_list1(delimited(space0, char(','), space0), operand),
            )),
            opt(preceded(space1, live_variables)),
        )),
        |(addr, size, mnemonic, operands, live)| RawInstr {
            addr,
            size,
            mnemonic,
            operands: operands.unwrap_or_default(),
            live: live.unwrap_or_default(),
        },
    )(input)
}

fn names(input: &str) -> IResult<&str, Vec<&str>> {
    separated_list0(space1, ident)(input)
}

fn line(input: &str) -> IResult<&str, Line> {
    delimited(
        space0,
        alt((
            map(preceded(pair(tag("arch"), space1), tag("x64")), |_| {
                Line::ArchX64
            }),
            map(
                preceded(tuple((tag("arch"), space1, tag("generic"), space1)), number),
                Line::ArchGeneric,
            ),
            map(preceded(pair(tag("module"), space1), ident), Line::Module),
            map(
                preceded(
                    pair(tag("reg"), space1),
                    pair(ident, opt(preceded(space1, names))),
                ),
                |(name, subs)| Line::Reg(name, subs.unwrap_or_default()),
            ),
            map(preceded(pair(tag("preserve"), space1), names), Line::Preserve),
            map(preceded(pair(tag("return"), space1), ident), Line::Return),
            map(
                preceded(pair(tag("mem"), space1), pair(number, preceded(space1, number))),
                |(addr, val)| Line::Mem(addr, val),
            ),
            map(preceded(pair(tag("ip"), space1), number), Line::Ip),
            map(preceded(pair(tag("frame"), space1), symbol), Line::Frame),
            map(preceded(pair(tag("function"), space1), symbol), Line::Function),
            map(instruction, Line::Instr),
            map(rest, |_| Line::Empty),
        )),
        space0,
    )(input)
}

fn strip_comment(text: &str) -> &str {
    text.split(';').next().unwrap_or_default().trim_end()
}

/// Parses a listing into a [`Program`].
///
/// # Errors
///
/// Returns a [`DisasmError::Parsing`] error on malformed lines, and
/// resolution errors (unknown registers, duplicated instructions) found
/// while building functions.
pub fn parse_listing(text: &str) -> DisasmResult<Program> {
    let mut builder = ListingBuilder::default();

    for (n, raw) in text.lines().enumerate() {
        let content = strip_comment(raw);
        let (_, parsed) = all_consuming(line)(content).map_err(|e| DisasmError::Parsing {
            line: n + 1,
            message: e.to_string(),
        })?;
        if let Line::Empty = parsed {
            if !content.trim().is_empty() {
                return Err(DisasmError::Parsing {
                    line: n + 1,
                    message: format!("unexpected '{}'", content.trim()),
                });
            }
            continue;
        }
        builder.apply(parsed).map_err(|e| match e {
            DisasmError::Parsing { .. } => e,
            other => DisasmError::Parsing {
                line: n + 1,
                message: other.to_string(),
            },
        })?;
    }

    builder.finish()
}

#[derive(Default)]
struct ListingBuilder {
    arch: Option<Arch>,
    module: Option<String>,
    program: Option<Program>,
    current: Option<(String, Vec<(Instruction, bool)>)>,
}

impl ListingBuilder {
    fn arch_mut(&mut self) -> DisasmResult<&mut Arch> {
        if self.arch.is_none() {
            self.arch = Some(Arch::x64()?);
        }
        self.arch
            .as_mut()
            .ok_or_else(|| DisasmError::Internal("missing architecture".to_string()))
    }

    fn program_mut(&mut self) -> DisasmResult<&mut Program> {
        if self.program.is_none() {
            let arch = match self.arch.take() {
                Some(arch) => arch,
                None => Arch::x64()?,
            };
            let module = self.module.as_deref().unwrap_or("app");
            self.program = Some(Program::new(arch, module));
        }
        self.program
            .as_mut()
            .ok_or_else(|| DisasmError::Internal("missing program".to_string()))
    }

    fn declaring(&self) -> DisasmResult<()> {
        if self.program.is_some() {
            Err(DisasmError::Internal(
                "architecture directives must come first".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn apply(&mut self, line: Line) -> DisasmResult<()> {
        match line {
            Line::Empty => (),
            Line::ArchX64 => {
                self.declaring()?;
                self.arch = Some(Arch::x64()?);
            }
            Line::ArchGeneric(bytes) => {
                self.declaring()?;
                self.arch = Some(Arch::generic(PointerWidth::from_bytes(bytes)?));
            }
            Line::Module(name) => {
                self.declaring()?;
                self.module = Some(name.to_string());
            }
            Line::Reg(name, subs) => {
                self.declaring()?;
                self.arch_mut()?.registers_mut().define(name, &subs)?;
            }
            Line::Preserve(regs) => {
                self.declaring()?;
                for reg in regs {
                    self.arch_mut()?.preserve(reg)?;
                }
            }
            Line::Return(reg) => {
                self.declaring()?;
                self.arch_mut()?.set_return_register(reg)?;
            }
            Line::Mem(addr, val) => self.program_mut()?.write_pointer(Addr(addr), val),
            Line::Ip(addr) => self.program_mut()?.set_instruction_pointer(Addr(addr)),
            Line::Frame(frame) => self.program_mut()?.set_top_frame(frame),
            Line::Function(name) => {
                self.close_function()?;
                self.program_mut()?;
                self.current = Some((name.to_string(), Vec::new()));
            }
            Line::Instr(raw) => {
                let program = self.program_mut()?;
                let sized = raw.size.is_some();
                let instr = resolve_instruction(program.arch(), raw)?;
                match &mut self.current {
                    Some((_, instrs)) => instrs.push((instr, sized)),
                    None => {
                        return Err(DisasmError::Internal(
                            "instruction outside of a function".to_string(),
                        ))
                    }
                }
            }
        }
        Ok(())
    }

    fn close_function(&mut self) -> DisasmResult<()> {
        if let Some((name, mut instrs)) = self.current.take() {
            instrs.sort_by_key(|(instr, _)| instr.addr());
            let next_addrs: Vec<Option<Addr>> = instrs
                .iter()
                .skip(1)
                .map(|(instr, _)| Some(instr.addr()))
                .chain(std::iter::once(None))
                .collect();
            let instrs = instrs
                .into_iter()
                .zip(next_addrs)
                .map(|((instr, sized), next)| match (sized, next) {
                    (false, Some(next)) => {
                        let addr = instr.addr().0;
                        instr.resized(next.0 - addr)
                    }
                    _ => instr,
                })
                .collect();
            self.program_mut()?.add_function(&name, instrs)?;
        }
        Ok(())
    }

    fn finish(mut self) -> DisasmResult<Program> {
        self.close_function()?;
        self.program_mut()?;
        self.program
            .ok_or_else(|| DisasmError::Internal("empty listing".to_string()))
    }
}

fn resolve_register(arch: &Arch, name: &str) -> DisasmResult<Register> {
    arch.registers().by_name(name).cloned()
}

fn resolve_operand(arch: &Arch, raw: RawOperand) -> DisasmResult<Operand> {
    match raw {
        RawOperand::Imm(value) => Ok(Operand::immediate(value)),
        RawOperand::Reg(dir, name) => Ok(Operand::register(
            resolve_register(arch, name)?,
            dir.input,
            dir.output,
        )),
        RawOperand::Mem(dir, size, terms) => {
            let mut mem = MemRef {
                base: None,
                index: None,
                scale: 1,
                displacement: 0,
                size: size.unwrap_or_else(|| arch.pointer_width().bytes()),
            };
            for term in terms {
                match term {
                    MemTerm::Disp(d) => mem.displacement = mem.displacement.wrapping_add(d),
                    MemTerm::Reg(name, None) if mem.base.is_none() => {
                        mem.base = Some(resolve_register(arch, name)?);
                    }
                    MemTerm::Reg(name, scale) if mem.index.is_none() => {
                        mem.index = Some(resolve_register(arch, name)?);
                        mem.scale = scale.unwrap_or(1);
                    }
                    MemTerm::Reg(name, _) => {
                        return Err(DisasmError::InvalidOperand(format!(
                            "too many registers in memory reference ({name})"
                        )))
                    }
                }
            }
            Ok(Operand::memory(mem, dir.input, dir.output))
        }
    }
}

fn resolve_instruction(arch: &Arch, raw: RawInstr) -> DisasmResult<Instruction> {
    let operands = raw
        .operands
        .into_iter()
        .map(|op| resolve_operand(arch, op))
        .collect::<DisasmResult<Vec<_>>>()?;
    let live_variables = raw
        .live
        .into_iter()
        .map(|(name, offset)| {
            if name.eq_ignore_ascii_case("stack") {
                Ok(LiveVariable {
                    location: LocationKind::Stack,
                    register: None,
                    offset,
                })
            } else {
                Ok(LiveVariable {
                    location: LocationKind::Register,
                    register: Some(resolve_register(arch, name)?),
                    offset,
                })
            }
        })
        .collect::<DisasmResult<Vec<_>>>()?;

    let instr = Instruction::new(Addr(raw.addr), raw.size.unwrap_or(1), raw.mnemonic, operands)
        .with_live_variables(live_variables);
    if instr.is_call() {
        Ok(instr.with_convention(arch.return_register().cloned(), arch.preserved().clone()))
    } else {
        Ok(instr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Disassembler, Memory, Symbols, ThreadContext};

    const LISTING: &str = "
arch generic 8
reg r1 r1l
reg r2 r2l
reg r3
reg r4
preserve r4
return r1
mem 0x3000 0x4000   ; call table
ip 0x100
frame app!main+0x10

function main
  0x0e8 8 mov >r3, <#1
  0x0f0 8 mov >r1, <r3
  0x0f8 8 mov >r2, <r4
  0x100 8 add <>r1, <[r2+0]
  0x108 8 call <qword [0x3000]
  0x110 8 ret

function callee
  0x4000 push <r4 !live r2:0, r3:8, stack:16
  0x4001 ret
";

    #[test]
    fn parse_numbers() {
        assert_eq!(number("0x1F"), Ok(("", 0x1f)));
        assert_eq!(number("42"), Ok(("", 42)));
        assert_eq!(signed("-8"), Ok(("", -8)));
    }

    #[test]
    fn parse_operands() {
        assert_eq!(
            operand("<>rax"),
            Ok((
                "",
                RawOperand::Reg(
                    Direction {
                        input: true,
                        output: true
                    },
                    "rax"
                )
            ))
        );
        assert_eq!(operand("#0x10"), Ok(("", RawOperand::Imm(0x10))));
        assert_eq!(
            operand(">dword [rbx + rcx*4 - 0x8]"),
            Ok((
                "",
                RawOperand::Mem(
                    Direction {
                        input: false,
                        output: true
                    },
                    Some(4),
                    vec![
                        MemTerm::Reg("rbx", None),
                        MemTerm::Reg("rcx", Some(4)),
                        MemTerm::Disp(-8)
                    ]
                )
            ))
        );
    }

    #[test]
    fn parse_instruction_line() {
        let (_, parsed) = all_consuming(line)("  0x100 4 mov >r1, <[r2+8] !live r1:0").unwrap();
        match parsed {
            Line::Instr(raw) => {
                assert_eq!(raw.addr, 0x100);
                assert_eq!(raw.size, Some(4));
                assert_eq!(raw.mnemonic, "mov");
                assert_eq!(raw.operands.len(), 2);
                assert_eq!(raw.live, vec![("r1", 0)]);
            }
            other => panic!("unexpected line {other:?}"),
        }
    }

    #[test]
    fn parse_full_listing() {
        let program = parse_listing(LISTING).unwrap();
        assert_eq!(program.arch().pointer_width(), PointerWidth::Bits64);
        assert_eq!(program.instruction_pointer(), Some(Addr(0x100)));
        assert_eq!(program.top_frame().as_deref(), Some("app!main+0x10"));
        assert_eq!(program.read_pointer(Addr(0x3000), PointerWidth::Bits64).unwrap(), 0x4000);

        let main = program.disassemble_function("main").unwrap();
        assert_eq!(main.nb_blocks(), 1);
        let block = main.block(main.entry().unwrap());
        let add = block.instruction_at(Addr(0x100)).unwrap();
        assert_eq!(format!("{add}"), "add r1, qword [r2]");

        let call = block.instruction_at(Addr(0x108)).unwrap();
        assert!(call.is_call());
        assert_eq!(call.return_register().unwrap().name(), "r1");

        let callee = program.disassemble_instructions(Addr(0x4000)).unwrap().next().unwrap();
        assert_eq!(callee.size(), 1);
        assert_eq!(callee.live_variables().count(), 3);
        assert_eq!(program.function_containing(Addr(0x4001)).as_deref(), Some("callee"));
        assert_eq!(program.module_symbol("app", "main").as_deref(), Some("main"));
    }

    #[test]
    fn default_arch_and_inferred_sizes() {
        let program = parse_listing(
            "reg rzz\nfunction f\n  0x10 mov >rax, #1\n  0x17 add <>rax, <rzz\n  0x1a 1 ret",
        )
        .unwrap();
        assert_eq!(program.arch().name(), "x64");
        assert!(program.arch().registers().by_name("rzz").is_ok());

        let sizes: Vec<(u64, u64)> = program
            .disassemble_instructions(Addr(0x10))
            .unwrap()
            .map(|instr| (instr.addr().value(), instr.size()))
            .collect();
        assert_eq!(sizes, vec![(0x10, 7), (0x17, 3), (0x1a, 1)]);
    }

    #[test]
    fn parse_errors() {
        assert!(matches!(
            parse_listing("function f\n  0x0 mov >xmm9, <r1"),
            Err(DisasmError::Parsing { line: 2, .. })
        ));
        assert!(matches!(
            parse_listing("function f\n  0x0 1 nop\narch x64"),
            Err(DisasmError::Parsing { line: 3, .. })
        ));
        assert!(matches!(
            parse_listing("0x0 1 nop"),
            Err(DisasmError::Parsing { line: 1, .. })
        ));
        assert!(matches!(
            parse_listing("function f\n  hello world"),
            Err(DisasmError::Parsing { line: 2, .. })
        ));
    }
}
