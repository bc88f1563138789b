use candle_core::backprop::GradStore;
use candle_core::{DType, Result, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};

/// Name fragments of parameters exempt from weight decay: biases and
/// normalization scales
const NO_DECAY: &[&str] = &["bias", "LayerNorm.weight", "layer_norm.weight"];

pub fn is_no_decay(name: &str) -> bool {
    NO_DECAY.iter().any(|nd| name.contains(nd))
}

/// Parameters split into the weight-decayed and the no-decay buckets
#[derive(Default)]
pub struct ParamGroups {
    pub decay: Vec<(String, Var)>,
    pub no_decay: Vec<(String, Var)>,
}

impl ParamGroups {
    pub fn from_varmap(varmap: &VarMap) -> Self {
        let mut groups = Self::default();
        // VarMap locks only fail if a previous holder panicked
        let data = match varmap.data().lock() {
            Ok(data) => data,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut entries: Vec<_> = data.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        for (name, var) in entries {
            if is_no_decay(name) {
                groups.no_decay.push((name.clone(), var.clone()));
            } else {
                groups.decay.push((name.clone(), var.clone()));
            }
        }
        groups
    }

    /// Every parameter, decayed group first
    pub fn vars(&self) -> Vec<Var> {
        self.decay
            .iter()
            .chain(self.no_decay.iter())
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.decay.len() + self.no_decay.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// AdamW over two parameter groups sharing one learning rate but with
/// different weight decay
pub struct GroupedAdamW {
    decay: AdamW,
    no_decay: AdamW,
}

impl GroupedAdamW {
    /// Optimizer state follows the parameter dtype, so parameters must be f32:
    /// an epsilon of 1e-8 rounds to zero in f16.
    pub fn new(groups: &ParamGroups, learning_rate: f64, eps: f64, weight_decay: f64) -> Result<Self> {
        if let Some((name, var)) = groups
            .decay
            .iter()
            .chain(groups.no_decay.iter())
            .find(|(_, v)| v.dtype() != DType::F32)
        {
            candle_core::bail!(
                "AdamW needs f32 parameters, {} is {:?}; train half precision through f32 master weights",
                name,
                var.dtype()
            );
        }
        let params = |weight_decay| ParamsAdamW {
            lr: learning_rate,
            eps,
            weight_decay,
            ..Default::default()
        };
        let vars = |group: &[(String, Var)]| group.iter().map(|(_, v)| v.clone()).collect::<Vec<_>>();

        Ok(Self {
            decay: AdamW::new(vars(&groups.decay), params(weight_decay))?,
            no_decay: AdamW::new(vars(&groups.no_decay), params(0.0))?,
        })
    }

    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        self.decay.step(grads)?;
        self.no_decay.step(grads)
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        self.decay.set_learning_rate(lr);
        self.no_decay.set_learning_rate(lr);
    }

    pub fn learning_rate(&self) -> f64 {
        self.decay.learning_rate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Tensor};
    use candle_nn::Init;

    fn varmap() -> VarMap {
        let varmap = VarMap::new();
        for name in [
            "bert.encoder.layer.0.attention.self.query.weight",
            "bert.encoder.layer.0.attention.self.query.bias",
            "bert.embeddings.LayerNorm.weight",
            "distilbert.transformer.layer.0.sa_layer_norm.weight",
            "classifier.weight",
        ] {
            varmap.get(2, name, Init::Const(1.0), DType::F32, &Device::Cpu).unwrap();
        }
        varmap
    }

    #[test]
    fn test_grouping() {
        let groups = ParamGroups::from_varmap(&varmap());
        let decay: Vec<&str> = groups.decay.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            decay,
            vec!["bert.encoder.layer.0.attention.self.query.weight", "classifier.weight"]
        );
        assert_eq!(groups.no_decay.len(), 3);
        assert_eq!(groups.vars().len(), 5);
    }

    #[test]
    fn test_no_decay_group_ignores_weight_decay() -> Result<()> {
        let varmap = varmap();
        let groups = ParamGroups::from_varmap(&varmap);
        let mut optimizer = GroupedAdamW::new(&groups, 0.1, 1e-8, 0.5)?;

        // zero loss gradient: only weight decay can move a parameter
        let loss = groups
            .vars()
            .iter()
            .map(|v| v.as_tensor().mul(&v.as_tensor().zeros_like()?)?.sum_all())
            .collect::<Result<Vec<Tensor>>>()?;
        let loss = Tensor::stack(&loss, 0)?.sum_all()?;
        let grads = loss.backward()?;
        optimizer.step(&grads)?;

        let (_, decayed) = &groups.decay[0];
        let (_, bias) = &groups.no_decay[0];
        assert!(grads.get(decayed).is_some());
        // 1 - lr * weight_decay
        for value in decayed.to_vec1::<f32>()? {
            assert!((value - 0.95).abs() < 1e-6);
        }
        assert_eq!(bias.to_vec1::<f32>()?, vec![1.0, 1.0]);
        Ok(())
    }

    #[test]
    fn test_rejects_half_precision_parameters() {
        let varmap = VarMap::new();
        varmap
            .get(3, "classifier.weight", Init::Const(0.5), DType::F16, &Device::Cpu)
            .unwrap();
        let groups = ParamGroups::from_varmap(&varmap);
        let err = GroupedAdamW::new(&groups, 1e-3, 1e-8, 0.0).err().unwrap();
        assert!(err.to_string().contains("classifier.weight"));
    }

    #[test]
    fn test_learning_rate_is_shared() -> Result<()> {
        let groups = ParamGroups::from_varmap(&varmap());
        let mut optimizer = GroupedAdamW::new(&groups, 1e-3, 1e-8, 0.0)?;
        optimizer.set_learning_rate(2e-4);
        assert_eq!(optimizer.learning_rate(), 2e-4);
        Ok(())
    }
}
