//! An ordered list of model terms: base terms followed by selected sites.

use stepgwas_geno::phenotype::PhenotypeTable;

use crate::term::ModelTerm;

#[derive(Debug, Clone)]
pub struct Model {
    terms: Vec<ModelTerm>,
    n_base: usize,
}

impl Model {
    /// A model holding only the given base terms.
    pub fn new(base: Vec<ModelTerm>) -> Self {
        let n_base = base.len();
        Self {
            terms: base,
            n_base,
        }
    }

    /// Mean, then one restricted factor term per factor column, then one
    /// covariate term per covariate column, over the given phenotype rows.
    pub fn from_phenotype(pheno: &PhenotypeTable, rows: &[usize]) -> Self {
        let mut base = vec![ModelTerm::mean(rows.len())];
        for factor in &pheno.factors {
            let levels = rows
                .iter()
                .map(|&r| factor.levels[r].clone().unwrap_or_default())
                .collect();
            base.push(ModelTerm::factor(factor.name.clone(), levels, true));
        }
        for cov in &pheno.covariates {
            let values = rows.iter().map(|&r| cov.values[r]).collect();
            base.push(ModelTerm::covariate(cov.name.clone(), values));
        }
        Self::new(base)
    }

    pub fn terms(&self) -> &[ModelTerm] {
        &self.terms
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn number_of_base_terms(&self) -> usize {
        self.n_base
    }

    pub fn number_of_rows(&self) -> usize {
        self.terms.first().map_or(0, |t| t.number_of_rows())
    }

    /// Terms added after the base terms.
    pub fn selected_terms(&self) -> &[ModelTerm] {
        &self.terms[self.n_base..]
    }

    /// Candidate-list positions of the selected site terms, in model order.
    pub fn selected_sites(&self) -> Vec<usize> {
        self.selected_terms().iter().filter_map(|t| t.site()).collect()
    }

    /// Number of design columns spanned by the base terms.
    pub fn base_columns(&self) -> usize {
        self.terms[..self.n_base]
            .iter()
            .map(|t| t.number_of_levels())
            .sum()
    }

    pub fn push(&mut self, term: ModelTerm) {
        self.terms.push(term);
    }

    /// Remove the last selected term. Base terms are never removed.
    pub fn pop(&mut self) -> Option<ModelTerm> {
        if self.terms.len() > self.n_base {
            self.terms.pop()
        } else {
            None
        }
    }

    /// The base terms alone.
    pub fn base(&self) -> Model {
        Model::new(self.terms[..self.n_base].to_vec())
    }

    /// This model with the term at `index` removed.
    pub fn without(&self, index: usize) -> Model {
        let mut terms = self.terms.clone();
        terms.remove(index);
        let n_base = if index < self.n_base {
            self.n_base - 1
        } else {
            self.n_base
        };
        Model { terms, n_base }
    }

    /// This model keeping base terms and the selected terms for which `keep` holds.
    pub fn retain_selected(&self, keep: impl Fn(&ModelTerm) -> bool) -> Model {
        let mut terms = self.terms[..self.n_base].to_vec();
        terms.extend(self.selected_terms().iter().filter(|t| keep(t)).cloned());
        Model {
            terms,
            n_base: self.n_base,
        }
    }

    /// Every term restricted to `rows`.
    pub fn sub_sample(&self, rows: &[usize]) -> Model {
        Model {
            terms: self.terms.iter().map(|t| t.sub_sample(rows)).collect(),
            n_base: self.n_base,
        }
    }
}
