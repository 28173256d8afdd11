use log::{debug, trace, warn};

use super::metadata::MetadataRef;
use super::{Result, Sm6Parser};
use crate::diagnostics::{DiagnosticCode, Error};
use crate::vsir::{
    DataType, Declaration, DescriptorInfo, DescriptorType, Dimension, Instruction, Opcode,
    Register, RegisterRange, RegisterType, SrcParam,
};

const RESOURCES_NAMED_METADATA: &str = "dx.resources";

/// Common descriptor operands: id, global variable, name, register space,
/// first register and register count.
const DESCRIPTOR_OPERAND_COUNT: usize = 6;
/// CBV descriptors add the buffer size.
const CBV_OPERAND_COUNT: usize = 7;

/// Last register of a range of `count` registers from `first`. A count of
/// `u32::MAX` is an unbounded range.
pub fn register_range_last(first: u32, count: u32) -> Option<u32> {
    if count == u32::MAX {
        return Some(u32::MAX);
    }
    count.checked_sub(1).and_then(|extra| first.checked_add(extra))
}

impl Sm6Parser<'_> {
    fn resources_error(&mut self, message: impl Into<String>) -> Error {
        self.error(DiagnosticCode::DxilInvalidResources, message);
        Error::InvalidShader
    }

    /// Decode the resource lists of `dx.resources`, emitting a declaration
    /// for each descriptor. A module without resources has no such node.
    pub(crate) fn resources_init(&mut self) -> Result<()> {
        let Some(operands) = self.find_named_metadata(RESOURCES_NAMED_METADATA) else {
            return Ok(());
        };
        let Some(lists) = self.metadata_node(operands.first().copied()) else {
            return Err(self.resources_error("Resource metadata is not a node."));
        };
        if lists.len() != 4 {
            return Err(self.resources_error(format!(
                "Resource metadata node has {} operands instead of 4.",
                lists.len()
            )));
        }

        for (i, list) in lists.iter().enumerate() {
            let Some(list) = list else {
                continue;
            };
            let Ok(descriptor_type) = DescriptorType::try_from(i as u32) else {
                continue;
            };
            self.resources_list_init(descriptor_type, *list)?;
        }
        Ok(())
    }

    fn resources_list_init(&mut self, descriptor_type: DescriptorType, m: MetadataRef) -> Result<()> {
        let Some(entries) = self.metadata_node(Some(m)) else {
            return Err(self.resources_error(format!(
                "Resource list of type {descriptor_type:?} is not a node."
            )));
        };

        for entry in entries {
            let Some(ops) = self.metadata_node(entry) else {
                return Err(self.resources_error("Resource descriptor is not a node."));
            };
            if ops.len() < DESCRIPTOR_OPERAND_COUNT {
                return Err(self.resources_error(format!(
                    "Invalid resource descriptor operand count {}.",
                    ops.len()
                )));
            }

            let Some(register_id) = self.metadata_uint(ops[0]) else {
                return Err(self.resources_error("Resource descriptor id is not an integer."));
            };
            if self
                .descriptors
                .iter()
                .any(|d| d.descriptor_type == descriptor_type && d.register_id == register_id)
            {
                warn!("Duplicate descriptor id {register_id}.");
            }
            if ops[1].is_some() && self.metadata_module_value(ops[1]).is_none() {
                warn!("Resource descriptor {register_id} global is not a value.");
            }
            if let Some(name) = self.metadata_string(ops[2]) {
                trace!("Resource descriptor {register_id} name {name}.");
            }

            let (Some(space), Some(first), Some(count)) = (
                self.metadata_uint(ops[3]),
                self.metadata_uint(ops[4]),
                self.metadata_uint(ops[5]),
            ) else {
                return Err(self.resources_error(format!(
                    "Resource descriptor {register_id} register range is not an integer triple."
                )));
            };
            let Some(last) = register_range_last(first, count) else {
                return Err(self.resources_error(format!(
                    "Resource descriptor {register_id} register range {first}, count {count} is invalid."
                )));
            };
            let range = RegisterRange { space, first, last };

            match descriptor_type {
                DescriptorType::Cbv => self.cbv_init(register_id, range, &ops)?,
                DescriptorType::Srv | DescriptorType::Uav | DescriptorType::Sampler => {
                    debug!("Unsupported descriptor type {descriptor_type:?}.");
                    self.error(
                        DiagnosticCode::DxilInvalidResources,
                        format!(
                            "Resource descriptor type {} is unsupported.",
                            descriptor_type as u32
                        ),
                    );
                    return Err(Error::InvalidShader);
                }
            }
        }
        Ok(())
    }

    fn cbv_init(&mut self, register_id: u32, range: RegisterRange, ops: &[Option<MetadataRef>]) -> Result<()> {
        if ops.len() < CBV_OPERAND_COUNT {
            return Err(self.resources_error(format!(
                "Invalid CBV descriptor operand count {}.",
                ops.len()
            )));
        }
        let Some(buffer_size) = self.metadata_uint(ops[6]) else {
            return Err(self.resources_error("CBV buffer size is not an integer."));
        };
        if ops.len() > CBV_OPERAND_COUNT && ops[7].is_some() {
            debug!("Ignoring CBV descriptor tags.");
        }

        let mut reg = Register::new(RegisterType::ConstBuffer, DataType::Float, 3);
        reg.idx[0].offset = register_id;
        reg.idx[1].offset = range.first;
        reg.idx[2].offset = range.last;
        reg.dimension = Dimension::Vec4;

        self.instructions.push(Instruction::declaration(
            Opcode::DclConstantBuffer,
            self.location.clone(),
            Declaration::ConstantBuffer {
                src: SrcParam::new(reg),
                size: buffer_size,
                range,
            },
        ));
        self.descriptors.push(DescriptorInfo {
            descriptor_type: DescriptorType::Cbv,
            register_id,
            range,
            buffer_size,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_ranges() {
        assert_eq!(register_range_last(0, 1), Some(0));
        assert_eq!(register_range_last(3, 4), Some(6));
        assert_eq!(register_range_last(5, u32::MAX), Some(u32::MAX));
        assert_eq!(register_range_last(5, 0), None);
        assert_eq!(register_range_last(u32::MAX - 1, 3), None);
    }
}
