mod common;

use common::{
    Basics, SHADER_COMPUTE, SHADER_PIXEL, SHADER_VERTEX, dxbc_container, dxil_chunk,
    entry_point, entry_point_named, minimal_module, ret, rotated,
};
use dxil_sm6::diagnostics::{DiagnosticCode, Severity};
use dxil_sm6::schema::blocks::{ConstantsCode, FunctionCode};
use dxil_sm6::vsir::{
    DataType, Declaration, DescriptorType, Opcode, RegisterRange, RegisterType, ShaderType,
    Swizzle, SysVal, WriteMask,
};
use dxil_sm6::{CompileInfo, Error, MessageContext, Program, SourceType, parse_dxil};

fn parse(data: &[u8]) -> (Result<Program, Error>, MessageContext) {
    let mut context = MessageContext::new();
    let info = CompileInfo::new(data, SourceType::DxilChunk).with_source_name("test.dxil");
    let result = parse_dxil(&info, &mut context);
    (result, context)
}

fn has_error(context: &MessageContext, code: DiagnosticCode, text: &str) -> bool {
    context
        .diagnostics()
        .iter()
        .any(|d| d.severity == Severity::Error && d.code == code && d.message.contains(text))
}

fn opcodes(program: &Program) -> Vec<Opcode> {
    program.instructions.iter().map(|ins| ins.opcode).collect()
}

/// Compute shader whose thread group dimensions are i32 constants with the
/// given record operands.
fn compute_module(dimensions: [u64; 3]) -> Vec<u8> {
    let (mut builder, basics, main) = minimal_module(SHADER_COMPUTE);
    let mut values: Vec<_> = dimensions
        .iter()
        .map(|&encoded| (ConstantsCode::Integer, vec![encoded]))
        .collect();
    values.push((ConstantsCode::Integer, vec![rotated(4)]));
    let constants = builder.constants(basics.i32, &values);

    let tag = builder.md_value(basics.i32, constants[3]);
    let dims: Vec<_> = constants[..3]
        .iter()
        .map(|&value| Some(builder.md_value(basics.i32, value)))
        .collect();
    let dims = builder.md_node(&dims);
    let properties = builder.md_node(&[Some(tag), Some(dims)]);
    entry_point(&mut builder, &basics, main, None, Some(properties));
    ret(&mut builder);
    builder.build()
}

#[test]
fn test_compute_thread_group() {
    let (result, context) = parse(&compute_module([rotated(8), rotated(8), rotated(1)]));
    let program = result.unwrap();
    assert!(!context.has_errors(), "{}", context.messages());

    assert_eq!(program.shader_version.shader_type, ShaderType::Compute);
    assert_eq!(program.shader_version.major, 6);
    assert_eq!(program.entry_point, "main");
    assert_eq!(opcodes(&program), vec![Opcode::DclThreadGroup, Opcode::Ret]);
    assert_eq!(
        program.instructions[0].declaration,
        Some(Declaration::ThreadGroupSize { x: 8, y: 8, z: 1 })
    );
}

#[test]
fn test_integer_constants_are_sign_rotated() {
    // 10 encodes +5; 2 encodes +1.
    let (result, _) = parse(&compute_module([10, 2, 2]));
    let program = result.unwrap();
    assert_eq!(
        program.instructions[0].declaration,
        Some(Declaration::ThreadGroupSize { x: 5, y: 1, z: 1 })
    );
}

#[test]
fn test_thread_group_limits() {
    let (result, _) = parse(&compute_module([rotated(1024), rotated(1024), rotated(64)]));
    assert!(result.is_ok());

    for dimensions in [
        [rotated(0), rotated(8), rotated(1)],
        [rotated(8), rotated(1025), rotated(1)],
        [rotated(8), rotated(8), rotated(65)],
        // -1
        [3, rotated(8), rotated(1)],
    ] {
        let (result, context) = parse(&compute_module(dimensions));
        assert_eq!(result.unwrap_err(), Error::InvalidShader);
        assert!(has_error(&context, DiagnosticCode::DxilInvalidProperties, "is invalid"));
    }
}

#[test]
fn test_duplicate_symbol_ids() {
    let (mut builder, basics, main) = minimal_module(SHADER_COMPUTE);
    builder.symbol(main, "other");
    entry_point(&mut builder, &basics, main, None, None);
    ret(&mut builder);

    let (result, context) = parse(&builder.build());
    assert_eq!(result.unwrap_err(), Error::InvalidShader);
    assert!(context.contains(DiagnosticCode::DxilInvalidValueSymtab));
}

#[test]
fn test_missing_entry_point() {
    let (mut builder, _, _) = minimal_module(SHADER_COMPUTE);
    ret(&mut builder);

    let (result, context) = parse(&builder.build());
    assert_eq!(result.unwrap_err(), Error::InvalidShader);
    assert!(context.contains(DiagnosticCode::DxilInvalidEntryPoint));
}

#[test]
fn test_branched_shaders_are_rejected() {
    let (mut builder, basics, main) = minimal_module(SHADER_PIXEL);
    entry_point(&mut builder, &basics, main, None, None);
    builder.set_block_count(2);
    ret(&mut builder);

    let (result, context) = parse(&builder.build());
    assert_eq!(result.unwrap_err(), Error::InvalidShader);
    assert!(has_error(
        &context,
        DiagnosticCode::DxilNotImplemented,
        "Branched shaders are not supported"
    ));
}

#[test]
fn test_unknown_shader_type_is_a_warning() {
    let (mut builder, basics, main) = minimal_module(20);
    entry_point(&mut builder, &basics, main, None, None);
    ret(&mut builder);

    let (result, context) = parse(&builder.build());
    let program = result.unwrap();
    assert_eq!(program.shader_version.shader_type, ShaderType::Unknown(20));
    assert!(context.contains(DiagnosticCode::DxilUnknownShaderType));
    assert!(!context.has_errors());
}

/// Pixel shader loading row 0 of constant buffer 0 through
/// `dx.op.createHandle` and `dx.op.cbufferLoadLegacy.f32`.
fn cbuffer_module(declare_resources: bool) -> Vec<u8> {
    let (mut builder, basics, main) = minimal_module(SHADER_PIXEL);
    let Basics { i1, i8, i32, float, .. } = basics;

    let handle = builder.named_struct("dx.types.Handle", &[i8]);
    let create_handle_type = builder.function_type(handle, &[i32, i8, i32, i32, i1]);
    builder.pointer(create_handle_type);
    let cbuf_ret = builder.named_struct("dx.types.CBufRet.f32", &[float, float, float, float]);
    let load_type = builder.function_type(cbuf_ret, &[i32, handle, i32]);
    builder.pointer(load_type);

    let create_handle = builder.function("dx.op.createHandle", create_handle_type, true);
    let load = builder.function("dx.op.cbufferLoadLegacy.f32", load_type, true);

    let ints = builder.int_constants(i32, &[57, 59, 0, 1, 16]);
    let [create_handle_op, load_op, zero, one, size] = ints[..] else {
        unreachable!()
    };
    let class = builder.int_constants(i8, &[2])[0];
    let non_uniform = builder.int_constants(i1, &[0])[0];

    if declare_resources {
        let zero_md = Some(builder.md_value(i32, zero));
        let one_md = Some(builder.md_value(i32, one));
        let size_md = Some(builder.md_value(i32, size));
        let name = Some(builder.md_string("cb0"));
        let cbv = builder.md_node(&[zero_md, None, name, zero_md, zero_md, one_md, size_md]);
        let cbvs = builder.md_node(&[Some(cbv)]);
        let lists = builder.md_node(&[None, None, Some(cbvs), None]);
        builder.md_named("dx.resources", &[lists]);
    }
    entry_point(&mut builder, &basics, main, None, None);

    let operands = vec![
        0,
        0,
        builder.rel(create_handle),
        builder.rel(create_handle_op),
        builder.rel(class),
        builder.rel(zero),
        builder.rel(zero),
        builder.rel(non_uniform),
    ];
    let handle_value = builder.instruction(FunctionCode::Call, operands, true).unwrap();

    let operands = vec![
        0,
        0,
        builder.rel(load),
        builder.rel(load_op),
        builder.rel(handle_value),
        builder.rel(zero),
    ];
    builder.instruction(FunctionCode::Call, operands, true);
    ret(&mut builder);
    builder.build()
}

#[test]
fn test_constant_buffer_load() {
    let (result, context) = parse(&cbuffer_module(true));
    let program = result.unwrap();
    assert!(!context.has_errors(), "{}", context.messages());

    assert_eq!(
        opcodes(&program),
        vec![Opcode::DclConstantBuffer, Opcode::Mov, Opcode::Ret]
    );
    assert_eq!(program.descriptors.len(), 1);
    let descriptor = &program.descriptors[0];
    assert_eq!(descriptor.descriptor_type, DescriptorType::Cbv);
    assert_eq!(descriptor.buffer_size, 16);
    assert_eq!(
        descriptor.range,
        RegisterRange {
            space: 0,
            first: 0,
            last: 0
        }
    );

    let mov = &program.instructions[1];
    let src = &mov.src[0].reg;
    assert_eq!(src.reg_type, RegisterType::ConstBuffer);
    assert_eq!(src.data_type, DataType::Float);
    assert_eq!(src.idx[0].offset, 0);
    assert_eq!(src.idx[2].offset, 0);
    assert_eq!(mov.dst[0].reg.reg_type, RegisterType::Ssa);
    assert_eq!(mov.dst[0].write_mask, WriteMask::ALL);
    assert_eq!(program.ssa_count, 1);
}

#[test]
fn test_unmatched_resource_handle() {
    let (result, context) = parse(&cbuffer_module(false));
    assert_eq!(result.unwrap_err(), Error::InvalidShader);
    assert!(has_error(&context, DiagnosticCode::DxilInvalidOperand, "was not found"));
    assert!(has_error(
        &context,
        DiagnosticCode::DxilInvalidResourceHandle,
        "not a handle"
    ));
}

/// Compute shader indexing a global `[4 x float]` with a GEP whose indices
/// are the i32 constants `[0, 1, 7]` picked by `indices`. A chained GEP indexes
/// the result of the first one.
fn gep_module(indices: &[usize], chained: bool) -> Vec<u8> {
    let (mut builder, basics, main) = minimal_module(SHADER_COMPUTE);
    let array = builder.array(4, basics.float);
    builder.pointer(array);
    builder.pointer(basics.float);
    let global = builder.global("g", array, false, None);
    let ints = builder.int_constants(basics.i32, &[0, 1, 7]);
    entry_point(&mut builder, &basics, main, None, None);

    let mut base = global;
    for _ in 0..=usize::from(chained) {
        let mut operands = vec![1, array, builder.rel(base)];
        operands.extend(indices.iter().map(|&i| builder.rel(ints[i])));
        base = builder.instruction(FunctionCode::Gep, operands, true).unwrap();
    }
    ret(&mut builder);
    builder.build()
}

#[test]
fn test_multi_dimensional_gep_is_not_implemented() {
    let (result, context) = parse(&gep_module(&[0, 1, 1], false));
    assert_eq!(result.unwrap_err(), Error::InvalidShader);
    assert!(has_error(&context, DiagnosticCode::DxilNotImplemented, "Multi-dimensional"));
}

#[test]
fn test_stacked_gep_is_not_implemented() {
    let (result, context) = parse(&gep_module(&[0, 1], true));
    assert_eq!(result.unwrap_err(), Error::InvalidShader);
    assert!(has_error(&context, DiagnosticCode::DxilNotImplemented, "previous GEP"));
}

#[test]
fn test_gep_index_past_the_array_end() {
    let (result, context) = parse(&gep_module(&[0, 2], false));
    assert_eq!(result.unwrap_err(), Error::InvalidShader);
    assert!(has_error(&context, DiagnosticCode::DxilInvalidOperand, "Array index 7"));
}

#[test]
fn test_single_gep_addresses_the_indexable_temp() {
    let (result, context) = parse(&gep_module(&[0, 1], false));
    let program = result.unwrap();
    assert!(!context.has_errors(), "{}", context.messages());
    assert_eq!(program.indexable_temp_count, 1);
    assert_eq!(opcodes(&program), vec![Opcode::DclIndexableTemp, Opcode::Ret]);
}

#[test]
fn test_vertex_passthrough() {
    let (mut builder, basics, main) = minimal_module(SHADER_VERTEX);
    let Basics { void, i8, i32, float, .. } = basics;

    let load_type = builder.function_type(float, &[i32, i32, i32, i8, i32]);
    builder.pointer(load_type);
    let store_type = builder.function_type(void, &[i32, i32, i32, i8, float]);
    builder.pointer(store_type);
    let load_input = builder.function("dx.op.loadInput.f32", load_type, true);
    let store_output = builder.function("dx.op.storeOutput.f32", store_type, true);

    let ints = builder.int_constants(i32, &[0, 1, 3, 4, 5, 9]);
    let [zero, one, three, four, five, nine] = ints[..] else {
        unreachable!()
    };
    let column = builder.int_constants(i8, &[0])[0];

    let [zero_md, one_md, three_md, four_md, nine_md] =
        [zero, one, three, four, nine].map(|value| Some(builder.md_value(i32, value)));
    let mut element = |name: &str, kind| {
        let name = Some(builder.md_string(name));
        let element = builder.md_node(&[
            zero_md, name, nine_md, kind, None, zero_md, one_md, four_md, zero_md, zero_md,
        ]);
        builder.md_node(&[Some(element)])
    };
    let inputs = element("TEXCOORD", zero_md);
    let outputs = element("SV_Position", three_md);
    let signatures = builder.md_node(&[Some(inputs), Some(outputs), None]);
    entry_point(&mut builder, &basics, main, Some(signatures), None);

    let operands = vec![
        0,
        0,
        builder.rel(load_input),
        builder.rel(four),
        builder.rel(zero),
        builder.rel(zero),
        builder.rel(column),
        builder.rel(zero),
    ];
    let loaded = builder.instruction(FunctionCode::Call, operands, true).unwrap();
    let operands = vec![
        0,
        0,
        builder.rel(store_output),
        builder.rel(five),
        builder.rel(zero),
        builder.rel(zero),
        builder.rel(column),
        builder.rel(loaded),
    ];
    builder.instruction(FunctionCode::Call, operands, false);
    ret(&mut builder);

    let (result, context) = parse(&builder.build());
    let program = result.unwrap();
    assert!(!context.has_errors(), "{}", context.messages());

    assert_eq!(
        opcodes(&program),
        vec![
            Opcode::DclOutputSiv,
            Opcode::DclInput,
            Opcode::Mov,
            Opcode::Mov,
            Opcode::Ret
        ]
    );
    let input = &program.input_signature.elements[0];
    assert_eq!(input.semantic_name, "TEXCOORD");
    assert_eq!(input.mask, WriteMask::ALL);
    assert_eq!(program.output_signature.elements[0].sysval, SysVal::Position);

    let load = &program.instructions[2];
    assert_eq!(load.src[0].reg.reg_type, RegisterType::Input);
    assert_eq!(load.src[0].swizzle, Swizzle::broadcast(0));
    assert_eq!(load.dst[0].reg.reg_type, RegisterType::Ssa);

    let store = &program.instructions[3];
    assert_eq!(store.dst[0].reg.reg_type, RegisterType::Output);
    assert_eq!(store.dst[0].write_mask, WriteMask::X);
    assert_eq!(store.src[0].reg.reg_type, RegisterType::Ssa);
}

#[test]
fn test_program_header_errors() {
    let (result, context) = parse(&[0; 12]);
    assert_eq!(result.unwrap_err(), Error::InvalidShader);
    assert!(context.contains(DiagnosticCode::DxilInvalidSize));

    // Bitcode whose root abbreviation is not ENTER_SUBBLOCK.
    let mut bitcode = u32::from_le_bytes([b'B', b'C', 0xc0, 0xde]).to_le_bytes().to_vec();
    bitcode.extend_from_slice(&[0; 4]);
    let (result, context) = parse(&dxil_chunk(SHADER_PIXEL, 6, 0, &bitcode));
    assert_eq!(result.unwrap_err(), Error::InvalidShader);
    assert!(has_error(&context, DiagnosticCode::DxilInvalidBitcode, "initial block abbreviation"));
}

#[test]
fn test_dxbc_container() {
    let (mut builder, basics, main) = minimal_module(SHADER_PIXEL);
    entry_point(&mut builder, &basics, main, None, None);
    ret(&mut builder);
    let container = dxbc_container(&builder.build());

    let mut context = MessageContext::new();
    let info = CompileInfo::new(&container, SourceType::Dxbc);
    let program = parse_dxil(&info, &mut context).unwrap();
    assert_eq!(opcodes(&program), vec![Opcode::Ret]);

    let mut context = MessageContext::new();
    let info = CompileInfo::new(&container[..40], SourceType::Dxbc);
    assert_eq!(parse_dxil(&info, &mut context).unwrap_err(), Error::InvalidArgument);
    assert!(context.has_errors());
}

#[test]
fn test_failed_instruction_keeps_its_value_slot() {
    let (mut builder, basics, main) = minimal_module(SHADER_PIXEL);
    let one = builder.int_constants(basics.i32, &[1])[0];
    // Last value before the body. Losing the failed result's slot would make
    // the second binop read this constant instead.
    builder.constants(
        basics.float,
        &[(ConstantsCode::Float, vec![u64::from(1.0f32.to_bits())])],
    );
    entry_point(&mut builder, &basics, main, None, None);

    let operands = vec![builder.rel(one), builder.rel(one), 99];
    let failed = builder.instruction(FunctionCode::Binop, operands, true).unwrap();
    let operands = vec![builder.rel(failed), builder.rel(one), 0];
    builder.instruction(FunctionCode::Binop, operands, true);
    ret(&mut builder);

    let (result, context) = parse(&builder.build());
    assert_eq!(result.unwrap_err(), Error::InvalidShader);
    assert!(has_error(
        &context,
        DiagnosticCode::DxilInvalidOperand,
        "Binary operation 0x63"
    ));
    assert!(!context.contains(DiagnosticCode::DxilTypeMismatch), "{}", context.messages());
    let errors = context
        .diagnostics()
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .count();
    assert_eq!(errors, 1, "{}", context.messages());
}

#[test]
fn test_semantic_index_gap_is_reported() {
    let (mut builder, basics, main) = minimal_module(SHADER_VERTEX);
    let Basics { i32, .. } = basics;
    let ints = builder.int_constants(i32, &[0, 1, 2, 3, 4, 9]);
    let [zero, one, two, three, four, nine] =
        [0, 1, 2, 3, 4, 5].map(|i| Some(builder.md_value(i32, ints[i])));

    let name = Some(builder.md_string("TEXCOORD"));
    let indices = Some(builder.md_node(&[zero, two]));
    let input = builder.md_node(&[zero, name, nine, zero, indices, zero, two, four, zero, zero]);
    let inputs = builder.md_node(&[Some(input)]);

    // Read after the inputs; its extra operands show reading went on.
    let name = Some(builder.md_string("SV_Position"));
    let output = builder.md_node(&[
        zero, name, nine, three, None, zero, one, four, zero, zero, None, None,
    ]);
    let outputs = builder.md_node(&[Some(output)]);

    let signatures = builder.md_node(&[Some(inputs), Some(outputs), None]);
    entry_point(&mut builder, &basics, main, Some(signatures), None);
    ret(&mut builder);

    let (result, context) = parse(&builder.build());
    assert_eq!(result.unwrap_err(), Error::InvalidShader);
    assert!(has_error(
        &context,
        DiagnosticCode::DxilInvalidSignature,
        "does not form a sequence at row 1"
    ));
    assert!(context.contains(DiagnosticCode::DxilIgnoringOperands));
}

#[test]
fn test_entry_point_name_is_case_sensitive() {
    let (mut builder, basics, main) = minimal_module(SHADER_PIXEL);
    entry_point_named(&mut builder, &basics, main, "MAIN", None, None);
    ret(&mut builder);

    let (result, context) = parse(&builder.build());
    let program = result.unwrap();
    assert_eq!(program.entry_point, "main");
    assert!(context.contains(DiagnosticCode::DxilEntryPointMismatch));
    assert!(!context.has_errors());
}
